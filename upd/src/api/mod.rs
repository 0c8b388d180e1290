//! API layer for HTTP request handling.
//!
//! - **[`handlers`]**: Axum route handlers
//!
//! # API Structure
//!
//! - **Uploads** (`POST /up`): store a multipart file upload in the storage root
//! - **Health** (`GET /healthz`): liveness check
//!
//! # OpenAPI Documentation
//!
//! Handlers are documented with `utoipa` annotations. The generated document is served at
//! `/openapi.json`.

pub mod handlers;
