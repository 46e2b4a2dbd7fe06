//! The counter kinds the marketplace keeps.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use harvestline_query::{ChangeEvent, ChangeKind, Filter, Table};
use serde_json::Value;
use uuid::Uuid;

use crate::application::repos::{RemoteStore, RepoError};
use crate::domain::delivery::utc_day_bounds;
use crate::domain::types::{DeliveryMethod, OrderStatus};
use crate::util::clock::Clock;

use super::source::{CounterSource, FeedSpec};

/// Line items across the owner's carts.
#[derive(Debug, Default, Clone, Copy)]
pub struct CartItemCount;

#[async_trait]
impl CounterSource for CartItemCount {
    fn name(&self) -> &'static str {
        "cart_items"
    }

    async fn aggregate(&self, store: &dyn RemoteStore, owner: Uuid) -> Result<u64, RepoError> {
        let carts = store
            .select(Table::Carts, &[Filter::eq("user_id", owner)])
            .await?;
        let cart_ids: Vec<Value> = carts.iter().filter_map(|row| row.get("id").cloned()).collect();
        if cart_ids.is_empty() {
            return Ok(0);
        }

        let items = store
            .select(
                Table::CartItems,
                &[Filter::In {
                    column: "cart_id".to_string(),
                    values: cart_ids,
                }],
            )
            .await?;
        Ok(items.len() as u64)
    }

    fn feeds(&self, owner: Uuid) -> Vec<FeedSpec> {
        // Items carry only a cart id, so any cart_items change may concern this owner.
        vec![
            FeedSpec::whole_table(Table::CartItems),
            FeedSpec::new(Table::Carts, vec![Filter::eq("user_id", owner)]),
        ]
    }
}

/// Conversations holding at least one unread message addressed to the owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreadConversations;

#[async_trait]
impl CounterSource for UnreadConversations {
    fn name(&self) -> &'static str {
        "unread_conversations"
    }

    async fn aggregate(&self, store: &dyn RemoteStore, owner: Uuid) -> Result<u64, RepoError> {
        let unread = store
            .select(
                Table::Messages,
                &[
                    Filter::eq("recipient_id", owner),
                    Filter::eq("read", false),
                ],
            )
            .await?;
        let conversations: HashSet<&str> = unread
            .iter()
            .filter_map(|row| row.get("conversation_id").and_then(Value::as_str))
            .collect();
        Ok(conversations.len() as u64)
    }

    fn feeds(&self, owner: Uuid) -> Vec<FeedSpec> {
        vec![FeedSpec::new(
            Table::Messages,
            vec![Filter::eq("recipient_id", owner)],
        )]
    }
}

/// Orders awaiting the owner's confirmation as a seller.
#[derive(Debug, Default, Clone, Copy)]
pub struct PendingOrders;

#[async_trait]
impl CounterSource for PendingOrders {
    fn name(&self) -> &'static str {
        "pending_orders"
    }

    async fn aggregate(&self, store: &dyn RemoteStore, owner: Uuid) -> Result<u64, RepoError> {
        let pending = store
            .select(
                Table::Orders,
                &[
                    Filter::eq("seller_id", owner),
                    Filter::eq("status", OrderStatus::Pending),
                ],
            )
            .await?;
        Ok(pending.len() as u64)
    }

    fn feeds(&self, owner: Uuid) -> Vec<FeedSpec> {
        vec![FeedSpec::new(
            Table::Orders,
            vec![Filter::eq("seller_id", owner)],
        )]
    }
}

/// A seller's non-cancelled delivery orders created during the current UTC day.
///
/// The owner of this counter is the seller.
#[derive(Clone)]
pub struct DailyDeliveryOrders {
    clock: Arc<dyn Clock>,
}

impl DailyDeliveryOrders {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl CounterSource for DailyDeliveryOrders {
    fn name(&self) -> &'static str {
        "daily_delivery_orders"
    }

    async fn aggregate(&self, store: &dyn RemoteStore, owner: Uuid) -> Result<u64, RepoError> {
        let (start, end) = utc_day_bounds(self.clock.now());
        let orders = store
            .select(
                Table::Orders,
                &[
                    Filter::eq("seller_id", owner),
                    Filter::eq("delivery_method", DeliveryMethod::Delivery),
                    Filter::neq("status", OrderStatus::Cancelled),
                    Filter::gte_time("created_at", start),
                    Filter::lte_time("created_at", end),
                ],
            )
            .await?;
        Ok(orders.len() as u64)
    }

    fn feeds(&self, owner: Uuid) -> Vec<FeedSpec> {
        vec![FeedSpec::new(
            Table::Orders,
            vec![Filter::eq("seller_id", owner)],
        )]
    }

    fn reacts_to(&self, event: &ChangeEvent) -> bool {
        matches!(event.kind, ChangeKind::Insert | ChangeKind::Update)
    }
}
