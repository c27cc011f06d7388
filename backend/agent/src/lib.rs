pub mod invoker;
pub mod orchestrator;
pub mod tool_loop;

pub use invoker::{HttpInvoker, PluginInvoker};
pub use orchestrator::{Orchestrator, OrchestratorSettings, PluginOverview};
pub use tool_loop::{ToolUseLoop, TurnOutcome, DEFAULT_MAX_ITERATIONS, MAX_ITERATIONS_MARKER};
