//! Checkout of one seller group and producer-side order handling.

use std::sync::Arc;

use harvestline_query::{Filter, Row, Table};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::cart::CartService;
use crate::application::delivery::DeliveryTracker;
use crate::application::error::AppError;
use crate::application::products::products_by_id;
use crate::application::repos::{RemoteStore, decode_row, decode_rows, patch};
use crate::cache::CounterCache;
use crate::domain::cart::CartSummary;
use crate::domain::entities::{OrderLine, OrderRecord};
use crate::domain::error::DomainError;
use crate::domain::types::{DeliveryMethod, OrderStatus};

#[derive(Debug, Clone, Copy)]
pub struct PlaceOrderCommand {
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub delivery_method: DeliveryMethod,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn RemoteStore>,
    carts: CartService,
    delivery: Arc<DeliveryTracker>,
    pending: Option<Arc<CounterCache>>,
}

impl OrderService {
    pub fn new(carts: CartService, delivery: Arc<DeliveryTracker>) -> Self {
        Self {
            store: carts.store().clone(),
            carts,
            delivery,
            pending: None,
        }
    }

    /// Nudge this pending-orders counter when the signed-in producer moves an order on.
    pub fn with_pending_counter(mut self, counter: Arc<CounterCache>) -> Self {
        self.pending = Some(counter);
        self
    }

    /// Turn the buyer's lines from one seller into an order.
    ///
    /// Delivery orders must pass the seller's eligibility check. Ordered
    /// quantities are taken out of stock and the lines leave the cart.
    #[instrument(skip(self), fields(buyer = %command.buyer_id, seller = %command.seller_id))]
    pub async fn place_order(&self, command: PlaceOrderCommand) -> Result<OrderRecord, AppError> {
        let lines = self.carts.fetch(command.buyer_id).await?;
        let summary = CartSummary::from_lines(&lines);
        let group = summary
            .group(command.seller_id)
            .ok_or_else(|| AppError::validation("cart has no items from this seller"))?;

        for line in &group.lines {
            if !line.product.is_active {
                return Err(DomainError::validation(format!(
                    "`{}` is no longer available",
                    line.product.name
                ))
                .into());
            }
            if line.item.quantity > line.product.stock {
                return Err(DomainError::validation(format!(
                    "only {} of `{}` left",
                    line.product.stock, line.product.name
                ))
                .into());
            }
        }

        if command.delivery_method == DeliveryMethod::Delivery {
            let eligibility = self.delivery.evaluate_group(group).await?;
            if !eligibility.is_eligible() {
                let reasons = serde_json::to_string(&eligibility.blockers)
                    .unwrap_or_else(|_| "ineligible".to_string());
                return Err(DomainError::delivery_unavailable(command.seller_id, reasons).into());
            }
        }

        let items: Vec<OrderLine> = group
            .lines
            .iter()
            .map(|line| OrderLine {
                product_id: line.product.id,
                quantity: line.item.quantity,
                unit_price_cents: line.product.price_cents,
            })
            .collect();

        let mut row = Row::new();
        row.insert("buyer_id".to_string(), json!(command.buyer_id));
        row.insert("seller_id".to_string(), json!(command.seller_id));
        row.insert("status".to_string(), json!(OrderStatus::Pending));
        row.insert(
            "delivery_method".to_string(),
            json!(command.delivery_method),
        );
        row.insert("total_cents".to_string(), json!(group.subtotal_cents()));
        row.insert("items".to_string(), json!(items));

        let inserted = self
            .store
            .insert(Table::Orders, vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::unexpected("insert returned no order row"))?;
        let order: OrderRecord = decode_row(inserted)?;

        for line in &group.lines {
            let remaining = line.product.stock.saturating_sub(line.item.quantity);
            self.store
                .update(
                    Table::Products,
                    &[Filter::eq("id", line.product.id)],
                    patch("stock", remaining),
                )
                .await?;
        }

        let item_ids: Vec<Uuid> = group.lines.iter().map(|line| line.item.id).collect();
        self.carts.remove_items(&item_ids).await?;

        info!(
            order = %order.id,
            method = order.delivery_method.as_str(),
            total_cents = order.total_cents,
            "Order placed"
        );
        Ok(order)
    }

    pub async fn list_for_buyer(&self, buyer_id: Uuid) -> Result<Vec<OrderRecord>, AppError> {
        self.list(vec![Filter::eq("buyer_id", buyer_id)]).await
    }

    pub async fn list_for_seller(
        &self,
        seller_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderRecord>, AppError> {
        let mut filters = vec![Filter::eq("seller_id", seller_id)];
        if let Some(status) = status {
            filters.push(Filter::eq("status", status));
        }
        self.list(filters).await
    }

    /// Move an order along its lifecycle. Cancelling returns the items to stock.
    #[instrument(skip(self), fields(seller = %seller_id, order = %order_id))]
    pub async fn update_status(
        &self,
        seller_id: Uuid,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<OrderRecord, AppError> {
        let filters = [
            Filter::eq("id", order_id),
            Filter::eq("seller_id", seller_id),
        ];
        let order: OrderRecord = match self.store.select(Table::Orders, &filters).await?.pop() {
            Some(row) => decode_row(row)?,
            None => return Err(DomainError::not_found("order").into()),
        };

        if !order.status.can_transition_to(next) {
            return Err(DomainError::validation(format!(
                "cannot move an order from {} to {}",
                order.status.as_str(),
                next.as_str()
            ))
            .into());
        }

        if order.status == OrderStatus::Pending
            && let Some(pending) = self.pending.as_ref()
        {
            pending.apply_delta(-1);
        }

        let updated: OrderRecord = match self
            .store
            .update(Table::Orders, &filters, patch("status", next.as_str()))
            .await?
            .pop()
        {
            Some(row) => decode_row(row)?,
            None => return Err(DomainError::not_found("order").into()),
        };

        if next == OrderStatus::Cancelled {
            self.restock(&updated).await?;
        }

        info!(
            from = order.status.as_str(),
            to = next.as_str(),
            "Order status updated"
        );
        Ok(updated)
    }

    async fn restock(&self, order: &OrderRecord) -> Result<(), AppError> {
        let ids: Vec<Uuid> = order.items.iter().map(|line| line.product_id).collect();
        let products = products_by_id(self.store.as_ref(), &ids).await?;
        for line in &order.items {
            let Some(product) = products.get(&line.product_id) else {
                warn!(product = %line.product_id, "Cancelled order references a missing product");
                continue;
            };
            self.store
                .update(
                    Table::Products,
                    &[Filter::eq("id", product.id)],
                    patch("stock", product.stock.saturating_add(line.quantity)),
                )
                .await?;
        }
        Ok(())
    }

    async fn list(&self, filters: Vec<Filter>) -> Result<Vec<OrderRecord>, AppError> {
        let rows = self.store.select(Table::Orders, &filters).await?;
        let mut orders: Vec<OrderRecord> = decode_rows(rows)?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::cart::testing::{CartFixture, row};
    use crate::cache::sources::PendingOrders;
    use crate::util::clock::FixedClock;

    fn orders(fixture: &CartFixture, cap: Option<u32>) -> OrderService {
        fixture.store.seed(
            Table::Profiles,
            vec![row(json!({
                "id": fixture.seller,
                "display_name": "Cedar Hollow",
                "role": "producer",
                "min_order_quantity": 2,
                "daily_delivery_cap": cap,
            }))],
        );
        let tracker = Arc::new(DeliveryTracker::new(
            fixture.store.clone(),
            Arc::new(FixedClock::new(OffsetDateTime::now_utc())),
            Duration::from_secs(15),
        ));
        OrderService::new(fixture.service.clone(), tracker)
    }

    fn place(fixture: &CartFixture, method: DeliveryMethod) -> PlaceOrderCommand {
        PlaceOrderCommand {
            buyer_id: fixture.user,
            seller_id: fixture.seller,
            delivery_method: method,
        }
    }

    #[tokio::test]
    async fn pickup_order_takes_stock_and_empties_cart() {
        let fixture = CartFixture::new();
        let service = orders(&fixture, Some(0));
        let eggs = fixture.product(600, 10);
        fixture.service.add_item(fixture.user, eggs, 3).await.unwrap();

        let order = service
            .place_order(place(&fixture, DeliveryMethod::Pickup))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_cents, 1800);
        assert_eq!(order.items.len(), 1);
        assert!(fixture.store.rows(Table::CartItems).is_empty());
        assert_eq!(fixture.service.counter().value(), 0);
        assert_eq!(
            fixture.store.rows(Table::Products)[0].get("stock"),
            Some(&Value::from(7))
        );
    }

    #[tokio::test]
    async fn delivery_is_refused_when_disabled() {
        let fixture = CartFixture::new();
        let service = orders(&fixture, Some(0));
        let eggs = fixture.product(600, 10);
        fixture.service.add_item(fixture.user, eggs, 3).await.unwrap();

        let err = service
            .place_order(place(&fixture, DeliveryMethod::Delivery))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Domain(DomainError::DeliveryUnavailable { .. })
        ));
        assert!(fixture.store.rows(Table::Orders).is_empty());
    }

    #[tokio::test]
    async fn delivery_requires_minimum_quantity() {
        let fixture = CartFixture::new();
        let service = orders(&fixture, None);
        let eggs = fixture.product(600, 10);
        fixture.service.add_item(fixture.user, eggs, 1).await.unwrap();

        assert!(
            service
                .place_order(place(&fixture, DeliveryMethod::Delivery))
                .await
                .is_err()
        );

        fixture.service.add_item(fixture.user, eggs, 1).await.unwrap();
        let order = service
            .place_order(place(&fixture, DeliveryMethod::Delivery))
            .await
            .unwrap();
        assert_eq!(order.delivery_method, DeliveryMethod::Delivery);
    }

    #[tokio::test]
    async fn producer_flow_respects_transitions_and_restocks_on_cancel() {
        let fixture = CartFixture::new();
        let pending = Arc::new(CounterCache::new(
            Arc::new(PendingOrders),
            fixture.service.store().clone(),
        ));
        pending.set_owner(Some(fixture.seller));
        let service = orders(&fixture, None).with_pending_counter(pending.clone());
        let eggs = fixture.product(600, 10);
        fixture.service.add_item(fixture.user, eggs, 4).await.unwrap();
        let order = service
            .place_order(place(&fixture, DeliveryMethod::Pickup))
            .await
            .unwrap();
        pending.refresh(fixture.seller).await;
        assert_eq!(pending.value(), 1);

        let err = service
            .update_status(fixture.seller, order.id, OrderStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::Validation { .. })));

        let cancelled = service
            .update_status(fixture.seller, order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(pending.value(), 0);
        assert_eq!(
            fixture.store.rows(Table::Products)[0].get("stock"),
            Some(&Value::from(10))
        );
    }
}
