pub mod envelope;
pub mod extract;
pub mod instructions;
pub mod prompts;
pub mod summary;
pub mod violation;

pub use envelope::{validate_envelope, InvokeContent, MessageContent, ResponseEnvelope};
pub use extract::{parse_response, parse_with_fallback, FALLBACK_APOLOGY};
pub use instructions::{render_system_instructions, CapabilityExample, CatalogEntry};
pub use summary::{summarize_result, PluginKind};
pub use violation::{ProtocolViolation, ViolationDetail, EXCERPT_LIMIT};
