//! Base types and error handling.
//!
//! Provides the foundational [`HttpError`](error::HttpError) type that every
//! failed request surfaces through the client.

pub mod error;
