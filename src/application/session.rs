//! The signed-in user's live badges and the services that nudge them.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::application::cart::CartService;
use crate::application::delivery::DeliveryTracker;
use crate::application::messaging::MessageService;
use crate::application::orders::OrderService;
use crate::application::repos::RemoteStore;
use crate::cache::sources::{CartItemCount, PendingOrders, UnreadConversations};
use crate::cache::{CounterCache, CounterConfig, CounterDriver, CounterSource};

/// Cart, unread-conversation and pending-order counters for one user, each
/// with its own reconciliation driver.
pub struct MarketSession {
    store: Arc<dyn RemoteStore>,
    cart: CounterDriver,
    unread: CounterDriver,
    pending: CounterDriver,
}

impl MarketSession {
    /// Spawn the drivers on the current tokio runtime.
    pub fn start(store: Arc<dyn RemoteStore>, config: &CounterConfig, user: Option<Uuid>) -> Self {
        let cart = spawn_counter(&store, Arc::new(CartItemCount), config.cart_poll, user);
        let unread = spawn_counter(&store, Arc::new(UnreadConversations), config.unread_poll, user);
        let pending = spawn_counter(
            &store,
            Arc::new(PendingOrders),
            config.pending_orders_poll,
            user,
        );
        info!(user = ?user, "Market session started");

        Self {
            store,
            cart,
            unread,
            pending,
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn cart_items(&self) -> &Arc<CounterCache> {
        self.cart.cache()
    }

    pub fn unread_conversations(&self) -> &Arc<CounterCache> {
        self.unread.cache()
    }

    pub fn pending_orders(&self) -> &Arc<CounterCache> {
        self.pending.cache()
    }

    pub fn user(&self) -> Option<Uuid> {
        self.cart_items().owner()
    }

    /// Sign in as another user, or sign out with `None`. Every counter resets and refetches.
    pub fn switch_user(&self, user: Option<Uuid>) {
        info!(user = ?user, "Market session user changed");
        for driver in [&self.cart, &self.unread, &self.pending] {
            driver.set_owner(user);
        }
    }

    pub fn carts(&self) -> CartService {
        CartService::new(self.store.clone(), self.cart_items().clone())
    }

    pub fn messages(&self) -> MessageService {
        MessageService::new(self.store.clone()).with_unread_counter(self.unread_conversations().clone())
    }

    pub fn orders(&self, delivery: Arc<DeliveryTracker>) -> OrderService {
        OrderService::new(self.carts(), delivery).with_pending_counter(self.pending_orders().clone())
    }

    /// Stop every driver and wait for their subscriptions to close.
    pub async fn shutdown(self) {
        let Self {
            cart,
            unread,
            pending,
            ..
        } = self;
        cart.shutdown().await;
        unread.shutdown().await;
        pending.shutdown().await;
        info!("Market session stopped");
    }
}

fn spawn_counter(
    store: &Arc<dyn RemoteStore>,
    source: Arc<dyn CounterSource>,
    poll: Duration,
    user: Option<Uuid>,
) -> CounterDriver {
    let cache = Arc::new(CounterCache::new(source, store.clone()));
    CounterDriver::spawn(cache, poll, user)
}

impl std::fmt::Debug for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketSession")
            .field("user", &self.user())
            .field("cart_items", &self.cart_items().value())
            .field("unread_conversations", &self.unread_conversations().value())
            .field("pending_orders", &self.pending_orders().value())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use harvestline_query::{Row, Table};
    use serde_json::json;
    use tokio::time;

    use super::*;
    use crate::infra::memory::InMemoryStore;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().expect("object fixture")
    }

    #[tokio::test(start_paused = true)]
    async fn switching_users_resets_and_refetches() {
        let store = Arc::new(InMemoryStore::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.seed(
            Table::Orders,
            vec![row(json!({
                "id": Uuid::new_v4(),
                "buyer_id": bob,
                "seller_id": alice,
                "status": "pending",
                "delivery_method": "pickup",
                "total_cents": 900,
                "created_at": "2026-10-19T08:00:00Z",
            }))],
        );

        let session = MarketSession::start(store.clone(), &CounterConfig::default(), Some(alice));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.pending_orders().value(), 1);

        session.switch_user(Some(bob));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.user(), Some(bob));
        assert_eq!(session.pending_orders().value(), 0);

        session.switch_user(None);
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.user(), None);
        assert_eq!(store.subscriber_count(), 0);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cart_writes_move_the_session_badge() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        let product = Uuid::new_v4();
        store.seed(
            Table::Products,
            vec![row(json!({
                "id": product,
                "seller_id": Uuid::new_v4(),
                "name": "Heirloom carrots",
                "price_cents": 350,
                "stock": 12,
            }))],
        );
        let session = MarketSession::start(store.clone(), &CounterConfig::default(), Some(user));
        time::sleep(Duration::from_millis(10)).await;

        session.carts().add_item(user, product, 2).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(session.cart_items().value(), 1);
        session.shutdown().await;
        assert_eq!(store.subscriber_count(), 0);
    }
}
