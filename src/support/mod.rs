//! Host-side services around the backend: the shared-runtime build cache
//! and native toolchain dialect selection.

pub mod cache;
pub mod toolchain;
