pub mod error;
pub mod traits;

pub use error::{FamulusError, InvocationErrorKind, ProtocolErrorKind};
pub use traits::{ModelClient, ModelRequest, ModelResponse};
