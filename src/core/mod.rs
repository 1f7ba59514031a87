pub mod chat_stream;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod settings;
pub mod store;
pub mod tokens;
pub mod usage;
