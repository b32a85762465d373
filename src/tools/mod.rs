pub mod executor;
pub mod output;
pub mod registry;
pub mod time;

pub use executor::{ToolError, ToolExecutor};
pub use output::ToolOutput;
pub use registry::{Tool, ToolContent, ToolRegistry, ToolSpec};
pub use time::CurrentTimeTool;
