//! HTTP request handlers.
//!
//! - [`upload`]: multipart file upload into the storage root
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to a plaintext response with the
//! matching HTTP status code.

pub mod upload;
