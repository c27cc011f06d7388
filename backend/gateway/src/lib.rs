//! HTTP gateway for the Famulus runtime.

pub mod server;

pub use server::{router, start_server};
