//! Cart route handlers.
//!
//! Mutations accept either a form post (HTMX controls) or a JSON body and
//! answer with the re-rendered fragment plus an `HX-Trigger: cartUpdated`
//! header, so every other cart view on the page refreshes itself. Script
//! clients can follow changes on the `/cart/events` SSE stream instead.

use std::convert::Infallible;

use axum::{
    Form, Json,
    extract::{FromRequest, Request, State},
    http::header,
    response::{
        AppendHeaders, IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
};
use futures::Stream;
use rust_decimal::Decimal;
use serde::{Deserialize, de::DeserializeOwned};
use site_shell_core::{CartUpdated, Price, ProductDescriptor, ProductId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, Result};
use crate::state::{AppState, SharedCart};

/// Name of the change notification, as an HTMX trigger and SSE event.
pub const CART_UPDATED_EVENT: &str = "cartUpdated";

/// Body extractor accepting `application/json` or a urlencoded form.
pub struct FormOrJson<T>(pub T);

impl<T, S> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        }
    }
}

/// A price as submitted: a bare number or display text like `"$1,299.00"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Number(Decimal),
    Text(String),
}

/// Add-to-cart data, as carried by an add-to-cart control.
#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub id: String,
    pub name: String,
    pub price: PriceInput,
    pub image: Option<String>,
    pub category: Option<String>,
}

impl TryFrom<AddToCartForm> for ProductDescriptor {
    type Error = AppError;

    fn try_from(form: AddToCartForm) -> std::result::Result<Self, Self::Error> {
        let price = match form.price {
            PriceInput::Number(amount) => Price::new(amount),
            PriceInput::Text(text) => text.parse(),
        }
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let product = Self {
            id: ProductId::new(form.id.trim()),
            name: form.name.trim().to_string(),
            price,
            image: form.image,
            category: form.category,
        };
        product.validate()?;
        Ok(product)
    }
}

/// Update cart form data.
#[derive(Debug, Deserialize)]
pub struct UpdateCartForm {
    pub id: String,
    pub quantity: i64,
}

/// Remove from cart form data.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartForm {
    pub id: String,
}

/// Run a cart mutation on the blocking pool; it persists to disk while
/// holding the cart lock.
async fn mutate_cart<F>(state: &AppState, op: F) -> Result<CartUpdated>
where
    F: FnOnce(&SharedCart) -> CartUpdated + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || op(state.cart()))
        .await
        .map_err(|e| AppError::Internal(format!("cart update task failed: {e}")))
}

fn trigger() -> AppendHeaders<[(&'static str, &'static str); 1]> {
    AppendHeaders([("HX-Trigger", CART_UPDATED_EVENT)])
}

/// Current cart as JSON.
#[instrument(skip(state))]
pub async fn show(State(state): State<AppState>) -> Json<CartUpdated> {
    Json(state.cart().snapshot())
}

/// Add one unit of a product (HTMX).
///
/// Returns the refreshed count badge.
#[instrument(skip(state, form), fields(product_id = %form.id))]
pub async fn add(
    State(state): State<AppState>,
    FormOrJson(form): FormOrJson<AddToCartForm>,
) -> Result<Response> {
    let product = ProductDescriptor::try_from(form)?;
    let event = mutate_cart(&state, move |cart| cart.add_item(&product)).await?;
    debug!(total_count = event.total_count, "Item added to cart");

    Ok((trigger(), state.badge().render()).into_response())
}

/// Set an item's quantity (HTMX). Zero or less removes it.
#[instrument(skip(state))]
pub async fn update(
    State(state): State<AppState>,
    FormOrJson(form): FormOrJson<UpdateCartForm>,
) -> Result<Response> {
    let id = ProductId::new(form.id);
    mutate_cart(&state, move |cart| cart.update_quantity(&id, form.quantity)).await?;
    Ok((trigger(), state.drawer().render()).into_response())
}

/// Remove an item (HTMX).
#[instrument(skip(state))]
pub async fn remove(
    State(state): State<AppState>,
    FormOrJson(form): FormOrJson<RemoveFromCartForm>,
) -> Result<Response> {
    let id = ProductId::new(form.id);
    mutate_cart(&state, move |cart| cart.remove_item(&id)).await?;
    Ok((trigger(), state.drawer().render()).into_response())
}

/// Empty the cart (HTMX).
#[instrument(skip(state))]
pub async fn clear(State(state): State<AppState>) -> Result<Response> {
    mutate_cart(&state, SharedCart::clear).await?;
    Ok((trigger(), state.drawer().render()).into_response())
}

/// Cart count badge fragment.
pub async fn count(State(state): State<AppState>) -> impl IntoResponse {
    state.badge().render()
}

/// Cart drawer fragment.
pub async fn drawer(State(state): State<AppState>) -> impl IntoResponse {
    state.drawer().render()
}

/// Stream of `cartUpdated` events, starting with the current state.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut receiver = state.events().stream();
    let initial = state.cart().snapshot();

    let stream = async_stream::stream! {
        yield Ok(to_event(&initial));
        loop {
            match receiver.recv().await {
                Ok(update) => yield Ok(to_event(&update)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cart event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_event(update: &CartUpdated) -> Event {
    let json = serde_json::to_string(update).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(CART_UPDATED_EVENT).data(json)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn form(price: PriceInput) -> AddToCartForm {
        AddToCartForm {
            id: " sku-1 ".to_string(),
            name: "Mug".to_string(),
            price,
            image: None,
            category: Some("kitchen".to_string()),
        }
    }

    #[test]
    fn test_form_to_descriptor_accepts_display_price() {
        let product =
            ProductDescriptor::try_from(form(PriceInput::Text("$1,299.50".to_string()))).unwrap();
        assert_eq!(product.id.as_str(), "sku-1");
        assert_eq!(product.price.amount(), Decimal::new(129_950, 2));
    }

    #[test]
    fn test_form_to_descriptor_rejects_bad_input() {
        let err = ProductDescriptor::try_from(form(PriceInput::Text("cheap".to_string())));
        assert!(matches!(err, Err(AppError::BadRequest(_))));

        let mut blank = form(PriceInput::Number(Decimal::ONE));
        blank.name = "  ".to_string();
        assert!(matches!(
            ProductDescriptor::try_from(blank),
            Err(AppError::Product(_))
        ));
    }

    #[test]
    fn test_price_input_from_json() {
        let number: PriceInput = serde_json::from_str("4.5").unwrap();
        assert!(matches!(number, PriceInput::Number(_)));
        let text: PriceInput = serde_json::from_str(r#""$4.50""#).unwrap();
        assert!(matches!(text, PriceInput::Text(_)));
    }

    struct NoNetwork;

    impl crate::cache::Fetcher for NoNetwork {
        fn fetch(
            &self,
            request: crate::cache::CacheRequest,
        ) -> futures::future::BoxFuture<
            'static,
            std::result::Result<crate::cache::CachedResponse, crate::cache::FetchError>,
        > {
            Box::pin(async move { Err(crate::cache::FetchError::Unreachable(request.url.to_string())) })
        }
    }

    fn state() -> AppState {
        let config = crate::config::ShellConfig::new(
            "https://site.test".parse().unwrap(),
            "http://127.0.0.1:9".parse().unwrap(),
        );
        AppState::new(
            config,
            std::sync::Arc::new(crate::storage::MemoryStore::new()),
            std::sync::Arc::new(NoNetwork),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_mutations_run_on_blocking_pool() {
        let state = state();
        let caller = std::thread::current().id();

        let (event, worker) = {
            let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
            let slot = std::sync::Arc::clone(&seen);
            let event = mutate_cart(&state, move |cart| {
                *slot.lock().unwrap() = Some(std::thread::current().id());
                cart.clear()
            })
            .await
            .unwrap();
            let worker = seen.lock().unwrap().take().unwrap();
            (event, worker)
        };

        assert_ne!(worker, caller);
        assert_eq!(event.total_count, 0);
    }

    #[tokio::test]
    async fn test_panicking_mutation_is_internal_error() {
        let state = state();
        let result = mutate_cart(&state, |_| panic!("storage driver bug")).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(state.cart().total_item_count(), 0);
    }
}
