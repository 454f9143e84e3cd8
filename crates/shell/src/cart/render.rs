//! Cart renderers: badge count and drawer contents.
//!
//! Renderers subscribe to [`CartUpdated`] and keep their own view of the
//! cart. They never read or write the store directly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use askama::Template;
use askama_web::WebTemplate;
use rust_decimal::Decimal;
use site_shell_core::{CartLineItem, CartUpdated};

use crate::events::{EventBus, SubscriptionId};

/// Cart item display data for templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemView {
    pub id: String,
    pub name: String,
    pub category: String,
    pub image: String,
    pub image_is_url: bool,
    pub quantity: u32,
    pub price: String,
    pub line_price: String,
}

/// Cart display data for templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub subtotal: String,
    pub item_count: u32,
}

impl CartView {
    /// Create an empty cart.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            subtotal: format_price(Decimal::ZERO),
            item_count: 0,
        }
    }
}

/// Format a decimal amount as a price string.
fn format_price(amount: Decimal) -> String {
    format!("${:.2}", amount.round_dp(2))
}

fn is_url(image: &str) -> bool {
    image.starts_with('/') || image.starts_with("http://") || image.starts_with("https://")
}

impl From<&CartLineItem> for CartItemView {
    fn from(item: &CartLineItem) -> Self {
        Self {
            id: item.id.to_string(),
            name: item.name.clone(),
            category: item.category.clone(),
            image: item.image.clone(),
            image_is_url: is_url(&item.image),
            quantity: item.quantity,
            price: item.unit_price.display(),
            line_price: format_price(item.line_total()),
        }
    }
}

impl From<&CartUpdated> for CartView {
    fn from(event: &CartUpdated) -> Self {
        Self {
            items: event.items.iter().map(CartItemView::from).collect(),
            subtotal: format_price(event.subtotal),
            item_count: event.total_count,
        }
    }
}

/// Cart count badge fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_count.html")]
pub struct CartCountTemplate {
    pub count: u32,
}

/// Cart items fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_items.html")]
pub struct CartItemsTemplate {
    pub cart: CartView,
}

/// Keeps the badge count in sync with the cart.
#[derive(Clone)]
pub struct BadgeRenderer {
    count: Arc<AtomicU32>,
    subscription: SubscriptionId,
}

impl BadgeRenderer {
    /// Subscribe to `events`, starting from `initial`.
    pub fn attach(events: &EventBus<CartUpdated>, initial: &CartUpdated) -> Self {
        let count = Arc::new(AtomicU32::new(initial.total_count));
        let handle = Arc::clone(&count);
        let subscription = events.subscribe(move |event: &CartUpdated| {
            handle.store(event.total_count, Ordering::SeqCst);
        });
        Self {
            count,
            subscription,
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn render(&self) -> CartCountTemplate {
        CartCountTemplate {
            count: self.count(),
        }
    }

    /// Stop receiving updates.
    pub fn detach(&self, events: &EventBus<CartUpdated>) {
        events.unsubscribe(self.subscription);
    }
}

/// Keeps the drawer contents in sync with the cart.
#[derive(Clone)]
pub struct DrawerRenderer {
    view: Arc<RwLock<CartView>>,
    subscription: SubscriptionId,
}

impl DrawerRenderer {
    /// Subscribe to `events`, starting from `initial`.
    pub fn attach(events: &EventBus<CartUpdated>, initial: &CartUpdated) -> Self {
        let view = Arc::new(RwLock::new(CartView::from(initial)));
        let handle = Arc::clone(&view);
        let subscription = events.subscribe(move |event: &CartUpdated| {
            let mut view = handle.write().unwrap_or_else(PoisonError::into_inner);
            *view = CartView::from(event);
        });
        Self { view, subscription }
    }

    #[must_use]
    pub fn view(&self) -> CartView {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn render(&self) -> CartItemsTemplate {
        CartItemsTemplate { cart: self.view() }
    }

    /// Stop receiving updates.
    pub fn detach(&self, events: &EventBus<CartUpdated>) {
        events.unsubscribe(self.subscription);
    }
}
