//! Skiff Core
//!
//! Orchestration runtime for a terminal coding agent:
//! - `agent` - the agentic loop, tool dispatch and the confirmation gate
//! - `ai` - OpenAI-compatible model client and streaming reassembly
//! - `mcp` - Model Context Protocol client over stdio, HTTP and SSE
//! - `tools` - tool registry and built-in tools

pub mod agent;
pub mod ai;
pub mod mcp;
pub mod paths;
pub mod sse;
pub mod tools;
