//! Cart reads and mutations, and the cached cart a session renders from.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use harvestline_query::{ChangeKind, Filter, Row, Table};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::products::{find_product, products_by_id};
use crate::application::repos::{FeedNotice, RemoteStore, decode_row, decode_rows, patch};
use crate::application::stock_cap::{StockAdjustment, StockAutoCap};
use crate::cache::CounterCache;
use crate::domain::cart::{CartLine, CartSummary};
use crate::domain::entities::{CartItemRecord, CartRecord, ProductRecord};
use crate::domain::error::DomainError;

/// Cart operations for one signed-in user, with optimistic badge updates.
///
/// Every mutation nudges the cart counter before the write is sent; a failed
/// write is returned to the caller and left for the next reconciliation to
/// correct.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn RemoteStore>,
    counter: Arc<CounterCache>,
}

impl CartService {
    pub fn new(store: Arc<dyn RemoteStore>, counter: Arc<CounterCache>) -> Self {
        Self { store, counter }
    }

    pub fn counter(&self) -> &Arc<CounterCache> {
        &self.counter
    }

    pub(crate) fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub async fn find_cart(&self, user_id: Uuid) -> Result<Option<CartRecord>, AppError> {
        let mut rows = self
            .store
            .select(Table::Carts, &[Filter::eq("user_id", user_id)])
            .await?;
        match rows.pop() {
            Some(row) => Ok(Some(decode_row(row)?)),
            None => Ok(None),
        }
    }

    /// The user's cart, created on first use.
    pub async fn ensure_cart(&self, user_id: Uuid) -> Result<CartRecord, AppError> {
        if let Some(cart) = self.find_cart(user_id).await? {
            return Ok(cart);
        }
        let row = self
            .store
            .insert(Table::Carts, vec![patch("user_id", user_id.to_string())])
            .await?
            .pop()
            .ok_or_else(|| AppError::unexpected("insert returned no cart row"))?;
        let cart: CartRecord = decode_row(row)?;
        debug!(cart = %cart.id, user = %user_id, "Cart created");
        Ok(cart)
    }

    /// Cart lines joined with their products, in item order.
    ///
    /// Items whose product no longer exists are skipped.
    pub async fn fetch(&self, user_id: Uuid) -> Result<Vec<CartLine>, AppError> {
        let Some(cart) = self.find_cart(user_id).await? else {
            return Ok(Vec::new());
        };
        let rows = self
            .store
            .select(Table::CartItems, &[Filter::eq("cart_id", cart.id)])
            .await?;
        let items: Vec<CartItemRecord> = decode_rows(rows)?;

        let product_ids: Vec<Uuid> = items
            .iter()
            .map(|item| item.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let products = products_by_id(self.store.as_ref(), &product_ids).await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            match products.get(&item.product_id) {
                Some(product) => lines.push(CartLine {
                    product: product.clone(),
                    item,
                }),
                None => warn!(
                    item = %item.id,
                    product = %item.product_id,
                    "Cart item references a missing product"
                ),
            }
        }
        Ok(lines)
    }

    /// Add `quantity` of a product, merging with an existing line and capping at stock.
    #[instrument(skip(self), fields(user = %user_id, product = %product_id))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<CartItemRecord, AppError> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1").into());
        }
        let product = find_product(self.store.as_ref(), product_id).await?;
        if !product.is_active {
            return Err(DomainError::validation("product is no longer available").into());
        }
        if product.stock == 0 {
            return Err(DomainError::validation("product is out of stock").into());
        }

        let cart = self.ensure_cart(user_id).await?;
        let existing = self
            .store
            .select(
                Table::CartItems,
                &[
                    Filter::eq("cart_id", cart.id),
                    Filter::eq("product_id", product_id),
                ],
            )
            .await?;

        if let Some(row) = existing.into_iter().next() {
            let item: CartItemRecord = decode_row(row)?;
            let merged = item.quantity.saturating_add(quantity).min(product.stock);
            return self.write_quantity(item.id, merged).await;
        }

        let mut row = Row::new();
        row.insert("cart_id".to_string(), json!(cart.id));
        row.insert("product_id".to_string(), json!(product_id));
        row.insert("quantity".to_string(), json!(quantity.min(product.stock)));

        self.counter.apply_delta(1);
        let inserted = self
            .store
            .insert(Table::CartItems, vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::unexpected("insert returned no cart item row"))?;
        let item: CartItemRecord = decode_row(inserted)?;
        info!(item = %item.id, quantity = item.quantity, "Cart item added");
        Ok(item)
    }

    /// Set a line's quantity, capped at stock. Zero removes the line.
    pub async fn set_quantity(
        &self,
        item_id: Uuid,
        quantity: u32,
    ) -> Result<Option<CartItemRecord>, AppError> {
        if quantity == 0 {
            self.remove_item(item_id).await?;
            return Ok(None);
        }
        let item = self.find_item(item_id).await?;
        let product = find_product(self.store.as_ref(), item.product_id).await?;
        let capped = quantity.min(product.stock);
        if capped == 0 {
            self.remove_item(item_id).await?;
            return Ok(None);
        }
        self.write_quantity(item_id, capped).await.map(Some)
    }

    /// Persist a quantity without consulting stock.
    pub(crate) async fn write_quantity(
        &self,
        item_id: Uuid,
        quantity: u32,
    ) -> Result<CartItemRecord, AppError> {
        let mut rows = self
            .store
            .update(
                Table::CartItems,
                &[Filter::eq("id", item_id)],
                patch("quantity", quantity),
            )
            .await?;
        match rows.pop() {
            Some(row) => Ok(decode_row(row)?),
            None => Err(DomainError::not_found("cart item").into()),
        }
    }

    pub async fn remove_item(&self, item_id: Uuid) -> Result<(), AppError> {
        self.counter.apply_delta(-1);
        let removed = self
            .store
            .delete(Table::CartItems, &[Filter::eq("id", item_id)])
            .await?;
        if removed == 0 {
            debug!(item = %item_id, "Cart item was already gone");
        }
        Ok(())
    }

    /// Remove every line from the user's cart, returning how many were removed.
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, AppError> {
        let Some(cart) = self.find_cart(user_id).await? else {
            return Ok(0);
        };
        self.counter.set_value(0);
        let removed = self
            .store
            .delete(Table::CartItems, &[Filter::eq("cart_id", cart.id)])
            .await?;
        info!(user = %user_id, removed, "Cart cleared");
        Ok(removed)
    }

    /// Remove specific lines, decrementing the badge by the number requested.
    pub(crate) async fn remove_items(&self, item_ids: &[Uuid]) -> Result<u64, AppError> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        let delta = i64::try_from(item_ids.len()).unwrap_or(i64::MAX);
        self.counter.apply_delta(-delta);
        Ok(self
            .store
            .delete(Table::CartItems, &[Filter::is_in("id", item_ids)])
            .await?)
    }

    async fn find_item(&self, item_id: Uuid) -> Result<CartItemRecord, AppError> {
        let mut rows = self
            .store
            .select(Table::CartItems, &[Filter::eq("id", item_id)])
            .await?;
        match rows.pop() {
            Some(row) => Ok(decode_row(row)?),
            None => Err(DomainError::not_found("cart item").into()),
        }
    }
}

/// One fetched (or patched) state of the cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CartSnapshot {
    /// Bumped by every fetch and every product patch.
    pub version: u64,
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn summary(&self) -> CartSummary {
        CartSummary::from_lines(&self.lines)
    }

    pub fn line(&self, item_id: Uuid) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.item.id == item_id)
    }
}

/// The cached cart of one user.
///
/// Product stock changes arriving on the change feed are patched into the
/// cached lines, and every new version is handed to the stock auto-cap.
pub struct CartContext {
    service: CartService,
    user_id: Uuid,
    snapshot_tx: watch::Sender<CartSnapshot>,
    auto_cap: StockAutoCap,
}

impl CartContext {
    pub fn new(service: CartService, user_id: Uuid, debounce: Duration) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(CartSnapshot::default());
        let auto_cap = StockAutoCap::new(service.clone(), debounce);
        Arc::new(Self {
            service,
            user_id,
            snapshot_tx,
            auto_cap,
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn service(&self) -> &CartService {
        &self.service
    }

    pub fn auto_cap(&self) -> &StockAutoCap {
        &self.auto_cap
    }

    pub fn snapshot(&self) -> CartSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CartSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Re-read the cart, publish it as a new version and schedule the auto-cap.
    pub async fn refresh(self: &Arc<Self>) -> Result<CartSnapshot, AppError> {
        let lines = self.service.fetch(self.user_id).await?;
        let mut published = CartSnapshot::default();
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.version += 1;
            snapshot.lines = lines;
            published = snapshot.clone();
        });
        debug!(
            user = %self.user_id,
            version = published.version,
            lines = published.lines.len(),
            "Cart snapshot refreshed"
        );
        self.schedule_auto_cap();
        Ok(published)
    }

    /// Patch a changed product into the cached lines. Returns whether any line referenced it.
    pub fn apply_product_change(self: &Arc<Self>, product: &ProductRecord) -> bool {
        let touched = self.snapshot_tx.send_if_modified(|snapshot| {
            let mut touched = false;
            for line in snapshot
                .lines
                .iter_mut()
                .filter(|line| line.product.id == product.id)
            {
                line.product = product.clone();
                touched = true;
            }
            if touched {
                snapshot.version += 1;
            }
            touched
        });
        if touched {
            debug!(product = %product.id, stock = product.stock, "Product change patched into cart");
            self.schedule_auto_cap();
        }
        touched
    }

    /// Subscribe to product changes and patch them into this cart until the handle is aborted.
    pub async fn listen_for_products(self: &Arc<Self>) -> Result<JoinHandle<()>, AppError> {
        let mut feed = self
            .service
            .store()
            .subscribe(Table::Products, Vec::new())
            .await?;
        let context = Arc::clone(self);
        let span = info_span!("cart_product_feed", user = %self.user_id);

        Ok(tokio::spawn(
            async move {
                while let Some(notice) = feed.next().await {
                    match notice {
                        FeedNotice::Change(event) if event.kind == ChangeKind::Update => {
                            let Some(row) = event.new else { continue };
                            match decode_row::<ProductRecord>(row) {
                                Ok(product) => {
                                    context.apply_product_change(&product);
                                }
                                Err(err) => warn!(error = %err, "Undecodable product change"),
                            }
                        }
                        FeedNotice::Change(_) => {}
                        FeedNotice::Lagged(skipped) => {
                            debug!(skipped, "Product feed lagged; refetching cart");
                            if let Err(err) = context.refresh().await {
                                warn!(error = %err, "Cart refetch after lag failed");
                            }
                        }
                    }
                }
                debug!("Product feed closed");
            }
            .instrument(span),
        ))
    }

    fn schedule_auto_cap(self: &Arc<Self>) {
        let context = Arc::clone(self);
        let span = info_span!("stock_auto_cap", user = %self.user_id);
        tokio::spawn(
            async move {
                if !context.auto_cap.settle().await {
                    return;
                }
                let _running = context.auto_cap.exclusive().await;
                let snapshot = context.snapshot();
                match context.auto_cap.cap(&snapshot).await {
                    Ok(adjustments) if !adjustments.is_empty() => {
                        context.apply_adjustments(&adjustments);
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "Stock auto-cap failed"),
                }
            }
            .instrument(span),
        );
    }

    /// Reflect persisted caps in the cached lines without starting a new version.
    ///
    /// Lines are matched by item id, so caps land even when a newer version was
    /// published while they were being written.
    fn apply_adjustments(&self, adjustments: &[StockAdjustment]) {
        self.snapshot_tx.send_if_modified(|snapshot| {
            let mut changed = false;
            for adjustment in adjustments {
                match *adjustment {
                    StockAdjustment::Reduced { item_id, to, .. } => {
                        if let Some(line) = snapshot
                            .lines
                            .iter_mut()
                            .find(|line| line.item.id == item_id && line.item.quantity > to)
                        {
                            line.item.quantity = to;
                            changed = true;
                        }
                    }
                    StockAdjustment::Removed { item_id, .. } => {
                        let before = snapshot.lines.len();
                        snapshot.lines.retain(|line| line.item.id != item_id);
                        changed |= snapshot.lines.len() != before;
                    }
                }
            }
            changed
        });
    }
}

impl std::fmt::Debug for CartContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot_tx.borrow();
        f.debug_struct("CartContext")
            .field("user_id", &self.user_id)
            .field("version", &snapshot.version)
            .field("lines", &snapshot.lines.len())
            .finish_non_exhaustive()
    }
}
