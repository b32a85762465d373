//! 核心层：执行状态、运行上下文、产物文档、有界重试、运行级错误

pub mod artifacts;
pub mod context;
pub mod error;
pub mod retry;
pub mod state;

pub use artifacts::{ArtifactError, ArtifactStore, FileArtifactStore, MemoryArtifactStore, RunArtifacts};
pub use context::{ContextError, RunContext, RunContextBuilder, RunLimits};
pub use error::FlowError;
pub use retry::{retry_with_cap, RetryOutcome};
pub use state::{ExecutionState, ReflectionVerdict, StateError, StateUpdate, STATE_VERSION};
