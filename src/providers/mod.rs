pub mod base;
pub mod ollama;
pub mod openai_compat;
pub mod retry;
