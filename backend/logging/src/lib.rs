//! Structured logging for the Famulus runtime.

pub mod logger;

pub use logger::init_logger;
