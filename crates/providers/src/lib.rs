//! Gemini implementations of the generation and file-store interfaces.

pub mod gemini;
pub mod gemini_files;
pub mod sse;

pub use gemini::GeminiClient;
pub use gemini_files::GeminiFileStore;
