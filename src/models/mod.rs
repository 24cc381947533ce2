//! Core data models for the image proxy.
//!
//! These are pure values: a validated request, the negotiated output format
//! and the cache key derived from them. None of them perform I/O.

pub mod cache_key;
pub mod image_request;
