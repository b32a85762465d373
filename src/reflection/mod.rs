//! 有界反思：结构化批评、补充信息、按计数器终止的重写循环

pub mod critic;
pub mod cycle;

pub use critic::{Critic, Critique, Research, DEFAULT_CRITIQUE_ATTEMPTS, MAX_QUERIES};
pub use cycle::{should_end, ReflectionCycle, DRAFT, GATHER, REFLECT};
