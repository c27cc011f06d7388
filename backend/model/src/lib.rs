pub mod mock;
pub mod ollama;

pub use mock::ScriptedModel;
pub use ollama::OllamaClient;
