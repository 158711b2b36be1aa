pub mod gemini;
pub mod gemini_files;
pub mod transport;

pub use gemini::{GeminiEndpoint, GeminiInlineTransport};
pub use gemini_files::GeminiFileTransport;
pub use transport::{classify_error, OcrTransport, TransportKind};
