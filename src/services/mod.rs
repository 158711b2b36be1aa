pub mod circuit_breaker;
pub mod ocr_service;
pub mod prompt;
pub mod sanitizer;
pub mod scoring;

pub use circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use ocr_service::{ImageSource, OcrOutcome, OcrService, RetryPolicy, TransportSlot};
pub use prompt::{build_answer_key_prompt, build_student_prompt};
pub use sanitizer::{normalize_answer, sanitize, sanitize_response, strip_code_fences, SanitizedResponse};
pub use scoring::{score, ScoreReport};
