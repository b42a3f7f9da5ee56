pub mod types;
pub mod classification;
pub mod retry;

pub use types::MalsiftError;
pub use classification::{ErrorCategory, ErrorClassification};
pub use retry::with_retry;
