//! Generation service clients.

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiClient, GeminiClientBuilder, GeminiModel};
