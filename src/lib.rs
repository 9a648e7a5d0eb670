// Library root. Exposes the completion core for the binary and integration tests.
// The binary entry point is src/main.rs.

pub mod chat;
pub mod config;
pub mod console;
pub mod error;
pub mod llm;
pub mod logger;
