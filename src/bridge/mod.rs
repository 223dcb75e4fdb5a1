//! Host-facing side: the handler table, and the N-API class when built as a
//! Node.js module.

pub mod callbacks;

#[cfg(feature = "napi")]
pub mod napi_exports;
