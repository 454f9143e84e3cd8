//! Client-side cart: persisted line items and their renderers.
//!
//! # Architecture
//!
//! ```text
//! KeyValueStore  <--  CartStore  --publish-->  EventBus<CartUpdated>
//!                                                 |            |
//!                                          BadgeRenderer  DrawerRenderer
//! ```
//!
//! The store owns the persisted record under [`CART_STORAGE_KEY`]. Renderers
//! and any other listener only ever see [`CartUpdated`] notifications.
//!
//! [`CartUpdated`]: site_shell_core::CartUpdated

mod render;
mod store;

pub use render::{
    BadgeRenderer, CartCountTemplate, CartItemView, CartItemsTemplate, CartView, DrawerRenderer,
};
pub use store::{CART_STORAGE_KEY, CartStore};
