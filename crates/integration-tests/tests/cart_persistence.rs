//! Cart store against real file storage.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use site_shell::cart::{CART_STORAGE_KEY, CartStore};
use site_shell::events::EventBus;
use site_shell::storage::{FileStore, KeyValueStore, MemoryStore};
use site_shell_core::{Price, ProductDescriptor, ProductId};

fn product(id: &str, cents: i64) -> ProductDescriptor {
    ProductDescriptor {
        id: ProductId::new(id),
        name: format!("Product {id}"),
        price: Price::from_cents(cents).unwrap(),
        image: Some("https://cdn.site.test/img.png".to_string()),
        category: Some("kitchen".to_string()),
    }
}

fn file_cart(dir: &std::path::Path) -> CartStore<FileStore> {
    CartStore::new(FileStore::open(dir).unwrap(), Arc::new(EventBus::new()))
}

#[test]
fn test_cart_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cart = file_cart(dir.path());
        cart.add_item(&product("mug", 1200));
        cart.add_item(&product("mug", 1200));
        cart.add_item(&product("tea", 850));
        cart.update_quantity(&ProductId::new("tea"), 3);
    }

    let reopened = file_cart(dir.path());
    let items = reopened.items();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id.as_str(), "mug");
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].image, "https://cdn.site.test/img.png");
    assert_eq!(items[1].quantity, 3);
    assert_eq!(reopened.total_item_count(), 5);
    assert_eq!(reopened.subtotal(), Price::from_cents(4950).unwrap().amount());
}

#[test]
fn test_clear_then_load_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cart = file_cart(dir.path());
    cart.add_item(&product("mug", 1200));
    cart.clear();

    let fresh = file_cart(dir.path());
    fresh.load();
    assert!(fresh.items().is_empty());
}

#[test]
fn test_corrupt_record_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStore::open(dir.path()).unwrap();
    storage.set(CART_STORAGE_KEY, "{not json").unwrap();

    let cart = CartStore::new(storage, Arc::new(EventBus::new()));
    assert!(cart.items().is_empty());

    cart.add_item(&product("mug", 1200));
    assert_eq!(file_cart(dir.path()).total_item_count(), 1);
}

#[test]
fn test_legacy_record_is_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStore::open(dir.path()).unwrap();
    storage
        .set(
            CART_STORAGE_KEY,
            r#"[
                {"id":"mug","name":"Mug","price":"12.00","quantity":1},
                {"id":"mug","name":"Mug","price":"12.00","quantity":2},
                {"id":"old","name":"Old","price":"1.00","quantity":0}
            ]"#,
        )
        .unwrap();

    let cart = CartStore::new(storage, Arc::new(EventBus::new()));
    let items = cart.items();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 3);
    assert_eq!(items[0].category, "general");
}

#[test]
fn test_failed_write_still_updates_and_notifies() {
    let storage = Arc::new(MemoryStore::new());
    let events = Arc::new(EventBus::new());
    let seen = Arc::new(AtomicU32::new(0));
    let handle = Arc::clone(&seen);
    events.subscribe(move |event: &site_shell_core::CartUpdated| {
        handle.store(event.total_count, Ordering::SeqCst);
    });

    let cart = CartStore::new(Arc::clone(&storage), events);
    storage.fail_writes(true);
    let event = cart.add_item(&product("mug", 1200));

    assert_eq!(event.total_count, 1);
    assert_eq!(cart.total_item_count(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(storage.get(CART_STORAGE_KEY).unwrap().is_none());
}
