//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for LLM API calls and
//! the prompts used to summarize tree nodes.

mod client;
mod prompts;

pub use client::LlmClient;
pub(crate) use client::status_error;
pub use prompts::Prompts;
