//! Request format conversion for model providers

pub mod openai;
