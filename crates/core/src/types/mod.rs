//! Core types for the site shell.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cache;
pub mod cart;
pub mod id;
pub mod price;

pub use cache::{CacheVersion, CacheVersionError};
pub use cart::{
    CartLineItem, CartSnapshot, CartUpdated, DEFAULT_CATEGORY, DescriptorError,
    PLACEHOLDER_IMAGE, ProductDescriptor, subtotal, total_count,
};
pub use id::*;
pub use price::{Price, PriceError};
