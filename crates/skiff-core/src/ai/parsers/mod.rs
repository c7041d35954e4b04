//! Wire-chunk parsers for model providers

pub mod openai;
