use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use harvestline::application::cart::{CartContext, CartService};
use harvestline::application::products::ProductService;
use harvestline::application::repos::{ChangeFeed, RemoteStore, RepoError};
use harvestline::cache::{CounterCache, sources::CartItemCount};
use harvestline::infra::memory::InMemoryStore;
use harvestline_query::{Filter, Row, Table};
use serde_json::{Value, json};
use tokio::time;
use uuid::Uuid;

struct Market {
    store: Arc<InMemoryStore>,
    products: ProductService,
    context: Arc<CartContext>,
    seller: Uuid,
    product: Uuid,
}

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object fixture")
}

async fn market(quantity: u32, stock: u32) -> Market {
    let store = Arc::new(InMemoryStore::new());
    let remote: Arc<dyn RemoteStore> = store.clone();
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let product = Uuid::new_v4();
    store.seed(
        Table::Products,
        vec![row(json!({
            "id": product,
            "seller_id": seller,
            "name": "Raw wildflower honey",
            "price_cents": 1400,
            "stock": stock,
        }))],
    );

    let counter = Arc::new(CounterCache::new(Arc::new(CartItemCount), remote.clone()));
    counter.set_owner(Some(buyer));
    let carts = CartService::new(remote.clone(), counter);
    carts
        .add_item(buyer, product, quantity)
        .await
        .expect("add honey to cart");

    Market {
        store,
        products: ProductService::new(remote),
        context: CartContext::new(carts, buyer, Duration::from_millis(300)),
        seller,
        product,
    }
}

/// Store whose cart line writes take a while to commit.
struct SlowCartWrites {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

impl SlowCartWrites {
    async fn pause(&self, table: Table) {
        if table == Table::CartItems {
            time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl RemoteStore for SlowCartWrites {
    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Row>, RepoError> {
        self.inner.select(table, filters).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, RepoError> {
        self.inner.insert(table, rows).await
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, RepoError> {
        self.pause(table).await;
        self.inner.update(table, filters, patch).await
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<u64, RepoError> {
        self.pause(table).await;
        self.inner.delete(table, filters).await
    }

    async fn subscribe(&self, table: Table, filters: Vec<Filter>) -> Result<ChangeFeed, RepoError> {
        self.inner.subscribe(table, filters).await
    }
}

fn stored_quantity(store: &InMemoryStore) -> Option<Value> {
    store
        .rows(Table::CartItems)
        .first()
        .and_then(|item| item.get("quantity").cloned())
}

#[tokio::test(start_paused = true)]
async fn stock_drop_on_the_feed_caps_the_cart_once_and_persists() {
    let market = market(6, 10).await;
    let feed = market
        .context
        .listen_for_products()
        .await
        .expect("subscribe to products");
    market.context.refresh().await.expect("initial cart fetch");
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(market.context.auto_cap().capped_version(), Some(1));
    assert_eq!(stored_quantity(&market.store), Some(Value::from(6)));

    market
        .products
        .update_stock(market.seller, market.product, 4)
        .await
        .expect("producer lowers stock");
    time::sleep(Duration::from_millis(100)).await;

    let pending = market.context.snapshot();
    assert_eq!(pending.version, 2);
    assert_eq!(pending.lines[0].product.stock, 4);
    assert_eq!(pending.lines[0].item.quantity, 6);

    time::sleep(Duration::from_millis(300)).await;

    let capped = market.context.snapshot();
    assert_eq!(capped.version, 2);
    assert_eq!(capped.lines[0].item.quantity, 4);
    assert_eq!(stored_quantity(&market.store), Some(Value::from(4)));
    assert_eq!(market.context.auto_cap().capped_version(), Some(2));

    let again = market
        .context
        .auto_cap()
        .cap(&capped)
        .await
        .expect("second pass over the same version");
    assert!(again.is_empty());

    feed.abort();
}

#[tokio::test(start_paused = true)]
async fn bursts_of_stock_updates_collapse_into_one_pass() {
    let market = market(8, 10).await;
    let feed = market
        .context
        .listen_for_products()
        .await
        .expect("subscribe to products");
    market.context.refresh().await.expect("initial cart fetch");

    for stock in [7, 5, 3] {
        market
            .products
            .update_stock(market.seller, market.product, stock)
            .await
            .expect("producer lowers stock");
        time::sleep(Duration::from_millis(50)).await;
    }
    time::sleep(Duration::from_millis(400)).await;

    let snapshot = market.context.snapshot();
    assert_eq!(snapshot.version, 4);
    assert_eq!(snapshot.lines[0].item.quantity, 3);
    assert_eq!(market.context.auto_cap().capped_version(), Some(4));
    assert_eq!(stored_quantity(&market.store), Some(Value::from(3)));

    feed.abort();
}

#[tokio::test(start_paused = true)]
async fn sold_out_product_leaves_the_cart() {
    let market = market(2, 10).await;
    let feed = market
        .context
        .listen_for_products()
        .await
        .expect("subscribe to products");
    market.context.refresh().await.expect("initial cart fetch");
    assert_eq!(market.context.service().counter().value(), 1);

    market
        .products
        .update_stock(market.seller, market.product, 0)
        .await
        .expect("producer sells out");
    time::sleep(Duration::from_millis(500)).await;

    assert!(market.context.snapshot().lines.is_empty());
    assert!(market.store.rows(Table::CartItems).is_empty());
    assert_eq!(market.context.service().counter().value(), 0);

    feed.abort();
}

#[tokio::test(start_paused = true)]
async fn product_change_during_a_removal_does_not_remove_twice() {
    let store = Arc::new(InMemoryStore::new());
    let remote: Arc<dyn RemoteStore> = Arc::new(SlowCartWrites {
        inner: store.clone(),
        delay: Duration::from_millis(100),
    });
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let (honey, beeswax) = (Uuid::new_v4(), Uuid::new_v4());
    for (id, name) in [(honey, "Raw wildflower honey"), (beeswax, "Beeswax candles")] {
        store.seed(
            Table::Products,
            vec![row(json!({
                "id": id,
                "seller_id": seller,
                "name": name,
                "price_cents": 1400,
                "stock": 10,
            }))],
        );
    }

    let counter = Arc::new(CounterCache::new(Arc::new(CartItemCount), remote.clone()));
    counter.set_owner(Some(buyer));
    let carts = CartService::new(remote.clone(), counter.clone());
    for product in [honey, beeswax] {
        carts.add_item(buyer, product, 2).await.expect("fill the cart");
    }
    assert_eq!(counter.value(), 2);

    let products = ProductService::new(remote);
    let context = CartContext::new(carts, buyer, Duration::from_millis(300));
    let feed = context
        .listen_for_products()
        .await
        .expect("subscribe to products");
    context.refresh().await.expect("initial cart fetch");
    time::sleep(Duration::from_millis(400)).await;

    products
        .update_stock(seller, honey, 0)
        .await
        .expect("honey sells out");
    // Debounce elapsed; the honey line's delete is still committing.
    time::sleep(Duration::from_millis(350)).await;
    products
        .update_price(seller, beeswax, 1600)
        .await
        .expect("beeswax gets pricier");
    time::sleep(Duration::from_millis(600)).await;

    let snapshot = context.snapshot();
    assert_eq!(snapshot.lines.len(), 1);
    assert_eq!(snapshot.lines[0].product.id, beeswax);
    assert_eq!(snapshot.lines[0].product.price_cents, 1600);
    assert_eq!(store.rows(Table::CartItems).len(), 1);
    assert_eq!(counter.value(), 1);

    feed.abort();
}
