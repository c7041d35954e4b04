//! AI provider layer
//!
//! Handles communication with OpenAI-compatible chat/completions APIs and
//! reassembly of their streamed responses.

pub mod assembler;
pub mod client;
pub mod format;
pub mod parsers;
pub mod streaming;
pub mod types;

pub use assembler::{AssemblerEvent, StreamAssembler};
pub use client::{ModelClient, ModelClientConfig, ModelError, ModelRequest, ModelResponse, OpenAiClient};
