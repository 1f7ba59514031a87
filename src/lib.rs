//! jrchat is a line-oriented chat client for OpenAI-compatible model APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation: the message store, the streaming
//!   session that serializes submissions and replies, settings, token
//!   accounting and configuration.
//! - [`api`] defines the request payloads and the streaming HTTP client that
//!   turns server-sent events into reply fragments.
//! - [`cli`] parses arguments and runs the interactive loop or a one-shot
//!   prompt, rendering replies as they stream in.
//! - [`utils`] holds the transcript log and shared test helpers.
//!
//! The binary (`src/main.rs`) routes straight through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
