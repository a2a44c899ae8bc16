//! Public facade crate for `askpipe`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `askpipe-core`.

pub use askpipe_core::*;
