//! The authoritative cart store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use site_shell_core::{
    CartLineItem, CartSnapshot, CartUpdated, ProductDescriptor, ProductId, subtotal, total_count,
};
use tracing::{debug, error, instrument, warn};

use crate::events::EventBus;
use crate::storage::KeyValueStore;

/// Storage key holding the serialized cart.
pub const CART_STORAGE_KEY: &str = "cart";

/// Single source of truth for cart contents.
///
/// Every mutation runs as one critical section: modify the items, persist
/// the full snapshot, then publish [`CartUpdated`]. Persistence failures are
/// logged and never undo the in-memory change.
///
/// Handlers subscribed to the event bus receive the full state in the event
/// and must not call mutating operations on the store from inside the
/// handler.
pub struct CartStore<S> {
    items: Mutex<CartSnapshot>,
    storage: S,
    events: Arc<EventBus<CartUpdated>>,
}

impl<S: KeyValueStore> CartStore<S> {
    /// Create a store and load whatever is persisted.
    pub fn new(storage: S, events: Arc<EventBus<CartUpdated>>) -> Self {
        let items = read_persisted(&storage);
        Self {
            items: Mutex::new(items),
            storage,
            events,
        }
    }

    /// Re-read the persisted snapshot, replacing the in-memory items.
    ///
    /// A missing or unreadable record yields an empty cart.
    pub fn load(&self) {
        let loaded = read_persisted(&self.storage);
        *self.lock() = loaded;
    }

    /// Add one unit of `product`, creating the line item if needed.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub fn add_item(&self, product: &ProductDescriptor) -> CartUpdated {
        self.mutate(|items| {
            if let Some(item) = items.iter_mut().find(|item| item.id == product.id) {
                item.quantity = item.quantity.saturating_add(1);
            } else {
                items.push(CartLineItem::from_descriptor(product));
            }
        })
    }

    /// Set the quantity of `id` exactly. Zero or below removes the item.
    #[instrument(skip(self), fields(product_id = %id))]
    pub fn update_quantity(&self, id: &ProductId, quantity: i64) -> CartUpdated {
        self.mutate(|items| {
            if quantity <= 0 {
                items.retain(|item| &item.id != id);
            } else if let Some(item) = items.iter_mut().find(|item| &item.id == id) {
                item.quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
            }
        })
    }

    /// Drop the line item for `id`, if present.
    #[instrument(skip(self), fields(product_id = %id))]
    pub fn remove_item(&self, id: &ProductId) -> CartUpdated {
        self.mutate(|items| items.retain(|item| &item.id != id))
    }

    /// Empty the cart.
    #[instrument(skip(self))]
    pub fn clear(&self) -> CartUpdated {
        self.mutate(Vec::clear)
    }

    /// Sum of all quantities.
    #[must_use]
    pub fn total_item_count(&self) -> u32 {
        total_count(&self.lock())
    }

    /// Sum of price x quantity. No tax or shipping.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        subtotal(&self.lock())
    }

    /// A copy of the current line items.
    #[must_use]
    pub fn items(&self) -> CartSnapshot {
        self.lock().clone()
    }

    /// The current state as a change notification, without publishing it.
    #[must_use]
    pub fn snapshot(&self) -> CartUpdated {
        CartUpdated::from_items(self.items())
    }

    fn lock(&self) -> MutexGuard<'_, CartSnapshot> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, op: impl FnOnce(&mut CartSnapshot)) -> CartUpdated {
        let mut items = self.lock();
        op(&mut items);
        self.persist(&items);

        let event = CartUpdated::from_items(items.clone());
        debug!(
            total_count = event.total_count,
            subtotal = %event.subtotal,
            "Cart updated"
        );
        self.events.publish(event.clone());
        event
    }

    fn persist(&self, items: &[CartLineItem]) {
        let json = match serde_json::to_string(items) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize cart");
                return;
            }
        };
        if let Err(e) = self.storage.set(CART_STORAGE_KEY, &json) {
            error!(error = %e, "Failed to persist cart");
        }
    }
}

/// Read and normalize the persisted cart, failing open to empty.
fn read_persisted(storage: &impl KeyValueStore) -> CartSnapshot {
    let raw = match storage.get(CART_STORAGE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "Failed to read persisted cart, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<CartSnapshot>(&raw) {
        Ok(items) => normalize(items),
        Err(e) => {
            warn!(error = %e, "Persisted cart is corrupt, starting empty");
            Vec::new()
        }
    }
}

/// Enforce the line item invariants on data we did not write ourselves:
/// no zero-quantity rows, at most one row per product id.
fn normalize(items: CartSnapshot) -> CartSnapshot {
    let mut normalized: CartSnapshot = Vec::with_capacity(items.len());
    for item in items.into_iter().filter(|item| item.quantity > 0) {
        if let Some(existing) = normalized.iter_mut().find(|e| e.id == item.id) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
        } else {
            normalized.push(item);
        }
    }
    normalized
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use site_shell_core::Price;

    use super::*;
    use crate::storage::MemoryStore;

    fn product(id: &str, price: &str) -> ProductDescriptor {
        ProductDescriptor {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: price.parse().unwrap(),
            image: None,
            category: None,
        }
    }

    fn store() -> CartStore<Arc<MemoryStore>> {
        CartStore::new(Arc::new(MemoryStore::new()), Arc::new(EventBus::new()))
    }

    #[test]
    fn test_repeated_add_increments_single_line() {
        let cart = store();
        for _ in 0..5 {
            cart.add_item(&product("mug", "8.00"));
        }
        let items = cart.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);
    }

    #[test]
    fn test_add_preserves_insertion_order() {
        let cart = store();
        cart.add_item(&product("b", "1"));
        cart.add_item(&product("a", "1"));
        cart.add_item(&product("b", "1"));
        let ids: Vec<_> = cart.items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![ProductId::new("b"), ProductId::new("a")]);
    }

    #[test]
    fn test_update_quantity_sets_exactly() {
        let cart = store();
        cart.add_item(&product("a", "2.00"));
        cart.update_quantity(&ProductId::new("a"), 4);
        assert_eq!(cart.total_item_count(), 4);
        assert_eq!(cart.subtotal(), Decimal::new(800, 2));
    }

    #[test]
    fn test_update_quantity_zero_or_negative_removes() {
        for quantity in [0, -3] {
            let cart = store();
            cart.add_item(&product("a", "1"));
            cart.add_item(&product("b", "1"));
            cart.update_quantity(&ProductId::new("a"), quantity);

            let reference = store();
            reference.add_item(&product("a", "1"));
            reference.add_item(&product("b", "1"));
            reference.remove_item(&ProductId::new("a"));

            assert_eq!(cart.items(), reference.items());
        }
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let cart = store();
        cart.add_item(&product("a", "1"));
        let event = cart.update_quantity(&ProductId::new("zzz"), 9);
        assert_eq!(event.total_count, 1);
    }

    #[test]
    fn test_every_mutation_broadcasts_full_state() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(None));
        {
            let calls = Arc::clone(&calls);
            let last = Arc::clone(&last);
            bus.subscribe(move |event: &CartUpdated| {
                calls.fetch_add(1, Ordering::SeqCst);
                *last.lock().unwrap() = Some(event.clone());
            });
        }
        let cart = CartStore::new(Arc::new(MemoryStore::new()), bus);

        cart.add_item(&product("a", "1.50"));
        cart.add_item(&product("a", "1.50"));
        cart.update_quantity(&ProductId::new("a"), 3);
        cart.remove_item(&ProductId::new("missing"));
        cart.clear();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let last = last.lock().unwrap().clone().unwrap();
        assert!(last.items.is_empty());
        assert_eq!(last.total_count, 0);
        assert_eq!(last.subtotal, Decimal::ZERO);
    }

    #[test]
    fn test_persisted_record_round_trips() {
        let storage = Arc::new(MemoryStore::new());
        let cart = CartStore::new(Arc::clone(&storage), Arc::new(EventBus::new()));
        cart.add_item(&product("a", "3.25"));
        cart.add_item(&product("b", "1"));
        cart.update_quantity(&ProductId::new("b"), 7);

        let fresh = CartStore::new(Arc::clone(&storage), Arc::new(EventBus::new()));
        assert_eq!(fresh.items(), cart.items());
    }

    #[test]
    fn test_write_failure_keeps_memory_state_and_broadcasts() {
        let storage = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        bus.subscribe(move |_: &CartUpdated| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let cart = CartStore::new(Arc::clone(&storage), bus);

        storage.fail_writes(true);
        cart.add_item(&product("a", "1"));

        assert_eq!(cart.total_item_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.get(CART_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_max_price_with_huge_quantity_stays_usable() {
        let storage = Arc::new(MemoryStore::new());
        let cart = CartStore::new(Arc::clone(&storage), Arc::new(EventBus::new()));
        let mut big = product("big", "1");
        big.price = Price::MAX;
        cart.add_item(&big);

        let event = cart.update_quantity(&ProductId::new("big"), i64::MAX);

        assert_eq!(event.total_count, u32::MAX);
        assert!(event.subtotal > Decimal::ZERO);
        let fresh = CartStore::new(storage, Arc::new(EventBus::new()));
        assert_eq!(fresh.subtotal(), cart.subtotal());
    }

    #[test]
    fn test_oversized_persisted_price_loads_empty() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(
                CART_STORAGE_KEY,
                r#"[{"id":"big","name":"Big","unitPrice":"79228162514264337593543950335","quantity":2}]"#,
            )
            .unwrap();

        let cart = CartStore::new(storage, Arc::new(EventBus::new()));

        assert!(cart.items().is_empty());
        assert_eq!(cart.snapshot().subtotal, Decimal::ZERO);
    }

    #[test]
    fn test_corrupt_record_loads_empty() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(CART_STORAGE_KEY, "{not json").unwrap();
        let cart = CartStore::new(storage, Arc::new(EventBus::new()));
        assert!(cart.items().is_empty());
    }

    #[test]
    fn test_load_normalizes_foreign_records() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(
                CART_STORAGE_KEY,
                r#"[
                    {"id":"a","name":"A","unitPrice":"1","quantity":2},
                    {"id":"b","name":"B","unitPrice":"1","quantity":0},
                    {"id":"a","name":"A","unitPrice":"1","quantity":3}
                ]"#,
            )
            .unwrap();
        let cart = CartStore::new(storage, Arc::new(EventBus::new()));
        let items = cart.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);
    }

    #[test]
    fn test_load_picks_up_external_changes() {
        let storage = Arc::new(MemoryStore::new());
        let cart = CartStore::new(Arc::clone(&storage), Arc::new(EventBus::new()));
        cart.add_item(&product("a", "1"));

        storage.set(CART_STORAGE_KEY, "[]").unwrap();
        cart.load();

        assert!(cart.items().is_empty());
    }

    #[test]
    fn test_concurrent_adds_do_not_lose_updates() {
        let cart = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cart = Arc::clone(&cart);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        cart.add_item(&product("a", "1"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cart.total_item_count(), 400);
    }
}
