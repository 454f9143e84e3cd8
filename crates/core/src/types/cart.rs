//! Cart line items, product descriptors and the change notification payload.
//!
//! The persisted record is a JSON array of [`CartLineItem`] in insertion
//! order. Field names are camelCase so records written by the browser-era
//! widget load without migration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::ProductId;
use super::price::Price;

/// Glyph used when a product has no image.
pub const PLACEHOLDER_IMAGE: &str = "📦";

/// Category used when a product has none.
pub const DEFAULT_CATEGORY: &str = "general";

/// The full ordered cart contents.
pub type CartSnapshot = Vec<CartLineItem>;

/// One row in the cart: a distinct product and how many of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub id: ProductId,
    pub name: String,
    #[serde(alias = "price")]
    pub unit_price: Price,
    #[serde(default = "default_image")]
    pub image: String,
    pub quantity: u32,
    #[serde(default = "default_category")]
    pub category: String,
}

impl CartLineItem {
    /// Build a fresh line item (quantity one) from a product descriptor.
    #[must_use]
    pub fn from_descriptor(product: &ProductDescriptor) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            image: product
                .image
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map_or_else(default_image, str::to_string),
            quantity: 1,
            category: product
                .category
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map_or_else(default_category, str::to_string),
        }
    }

    /// Unit price multiplied by quantity, saturating at `Decimal::MAX`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * self.quantity
    }
}

fn default_image() -> String {
    PLACEHOLDER_IMAGE.to_string()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Errors produced when validating a [`ProductDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("product id must not be empty")]
    MissingId,
    #[error("product name must not be empty")]
    MissingName,
}

/// Input to "add to cart": what an add-to-cart control describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDescriptor {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ProductDescriptor {
    /// Check that the descriptor names a product.
    ///
    /// # Errors
    ///
    /// Returns an error if the id or name is blank.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.is_blank() {
            return Err(DescriptorError::MissingId);
        }
        if self.name.trim().is_empty() {
            return Err(DescriptorError::MissingName);
        }
        Ok(())
    }
}

/// Sum of all quantities.
#[must_use]
pub fn total_count(items: &[CartLineItem]) -> u32 {
    items
        .iter()
        .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
}

/// Sum of price x quantity across all items, saturating at `Decimal::MAX`.
#[must_use]
pub fn subtotal(items: &[CartLineItem]) -> Decimal {
    items.iter().fold(Decimal::ZERO, |acc, item| {
        acc.checked_add(item.line_total()).unwrap_or(Decimal::MAX)
    })
}

/// Broadcast after every cart mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartUpdated {
    pub items: CartSnapshot,
    pub total_count: u32,
    pub subtotal: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl CartUpdated {
    /// Build a notification for the given items, computing totals fresh.
    #[must_use]
    pub fn from_items(items: CartSnapshot) -> Self {
        Self {
            total_count: total_count(&items),
            subtotal: subtotal(&items),
            items,
            updated_at: Utc::now(),
        }
    }
}
