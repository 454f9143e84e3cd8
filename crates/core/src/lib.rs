//! Site Shell Core - Shared types library.
//!
//! This crate provides the domain types used across all site shell components:
//! - `shell` - Caching reverse proxy and cart service
//! - `cli` - Command-line tools for manifests and cart inspection
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no storage
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype keys, prices, cart line items, and cache versions

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
