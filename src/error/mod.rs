//! Error Handling Module
//!
//! This module provides the error type shared by every layer of the crate:
//! - Core error type (`LlmError`) and its machine-readable kind (`ErrorKind`)
//! - Small constructors used by the backends
//! - Type conversions from common error types
//!
//! # Example
//!
//! ```rust,ignore
//! use chatweave::error::{ErrorKind, LlmError};
//!
//! let error = LlmError::prompt_too_large(100, 130);
//! assert_eq!(error.kind(), ErrorKind::PromptTooLarge);
//! assert!(!error.is_retryable());
//! ```

// Module declarations
mod conversions;
pub mod helpers;
pub mod types;

// Re-exports for public API
pub use helpers::*;
pub use types::*;
