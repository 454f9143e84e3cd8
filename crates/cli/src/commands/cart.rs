//! Persisted cart commands.
//!
//! These read the same `FileStore` record the server writes. Run them while
//! the server is stopped; a running server keeps its own copy in memory and
//! overwrites the record on its next change.

use std::path::Path;
use std::sync::Arc;

use site_shell::cart::CartStore;
use site_shell::events::EventBus;
use site_shell::storage::FileStore;
use site_shell_core::Price;
use tracing::info;

fn open(data_dir: &Path) -> Result<CartStore<FileStore>, Box<dyn std::error::Error>> {
    let storage = FileStore::open(data_dir)?;
    Ok(CartStore::new(storage, Arc::new(EventBus::new())))
}

/// Print the persisted cart.
///
/// # Errors
///
/// Returns an error if the data directory cannot be opened.
pub fn show(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cart = open(data_dir)?;
    let items = cart.items();
    let subtotal = Price::new(cart.subtotal()).unwrap_or(Price::ZERO);

    #[allow(clippy::print_stdout)]
    {
        if items.is_empty() {
            println!("Cart is empty");
            return Ok(());
        }
        for item in &items {
            println!(
                "{:>4} x {} {} ({}) @ {}",
                item.quantity, item.image, item.name, item.id, item.unit_price
            );
        }
        println!("items:    {}", cart.total_item_count());
        println!("subtotal: {subtotal}");
    }
    Ok(())
}

/// Empty the persisted cart.
///
/// # Errors
///
/// Returns an error if the data directory cannot be opened.
pub fn clear(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cart = open(data_dir)?;
    let removed = cart.total_item_count();
    cart.clear();
    info!(removed, dir = %data_dir.display(), "Cart cleared");
    Ok(())
}
