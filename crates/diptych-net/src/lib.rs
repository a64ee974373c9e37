#![forbid(unsafe_code)]

//! Thin HTTP transport for segment fetches.
//!
//! One concern: fetch a URL to `Bytes`, honoring cancellation and the
//! pipeline's retry-once policy. Everything smarter (ordering, prefetch)
//! lives in `diptych-segments`.

mod client;
mod error;
mod types;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use types::NetOptions;
