use std::{process, sync::Arc, time::Duration};

use harvestline::{
    application::{
        cart::{CartContext, CartService, CartSnapshot},
        delivery::DeliveryTracker,
        error::AppError,
        repos::RemoteStore,
        session::MarketSession,
    },
    cache::{CounterCache, CounterConfig, sources::CartItemCount},
    config::{self, CartArgs, Command, FixtureArgs, Settings, WatchArgs},
    domain::{cart::CartSummary, delivery::DeliveryEligibility},
    infra::{error::InfraError, fixture::Fixture, memory::InMemoryStore, telemetry},
    util::clock::SystemClock,
};
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Command::Watch(args) => run_watch(settings, *args).await,
        Command::Cart(args) => run_cart(settings, args).await,
    }
}

fn seed_store(settings: &Settings, target: &FixtureArgs) -> Result<Arc<InMemoryStore>, AppError> {
    let fixture = Fixture::load(&target.fixture)?;
    let store = InMemoryStore::with_feed_capacity(settings.store.feed_capacity.get());
    fixture.seed(&store);
    Ok(Arc::new(store))
}

async fn run_watch(settings: Settings, args: WatchArgs) -> Result<(), AppError> {
    let user = args.target.user;
    let store: Arc<dyn RemoteStore> = seed_store(&settings, &args.target)?;
    let counters = CounterConfig::from(&settings.counters);

    let session = MarketSession::start(store.clone(), &counters, Some(user));
    let delivery = Arc::new(DeliveryTracker::new(
        store.clone(),
        Arc::new(SystemClock),
        counters.delivery_orders_poll,
    ));
    let cart = CartContext::new(session.carts(), user, settings.cart.stock_cap_debounce);

    let mut tasks: Vec<JoinHandle<()>> = vec![cart.listen_for_products().await?];
    for counter in [
        session.cart_items(),
        session.unread_conversations(),
        session.pending_orders(),
    ] {
        tasks.push(tokio::spawn(log_counter(counter.clone())));
    }
    tasks.push(tokio::spawn(follow_cart(cart.watch(), delivery.clone())));

    let snapshot = cart.refresh().await?;
    info!(
        user = %user,
        lines = snapshot.lines.len(),
        sellers = snapshot.summary().groups.len(),
        "Watching counters"
    );

    wait_for_stop(args.seconds).await?;

    for task in tasks {
        task.abort();
        let _ = task.await;
    }
    delivery.shutdown().await;
    session.shutdown().await;
    Ok(())
}

async fn log_counter(counter: Arc<CounterCache>) {
    let mut values = counter.watch();
    loop {
        let value = *values.borrow_and_update();
        info!(
            counter = counter.name(),
            value,
            freshness = ?counter.freshness(),
            "Counter value"
        );
        if values.changed().await.is_err() {
            break;
        }
    }
}

/// Keep delivery counters running for exactly the sellers in the cart.
async fn follow_cart(mut snapshots: watch::Receiver<CartSnapshot>, delivery: Arc<DeliveryTracker>) {
    loop {
        let summary = snapshots.borrow_and_update().summary();
        delivery.track_summary(&summary);
        match delivery.eligibility(&summary).await {
            Ok(eligibility) => {
                for seller in eligibility {
                    debug!(
                        seller = %seller.seller_id,
                        eligible = seller.is_eligible(),
                        todays_orders = seller.todays_orders,
                        "Delivery eligibility"
                    );
                }
            }
            Err(err) => warn!(error = %err, "Delivery eligibility unavailable"),
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

async fn wait_for_stop(seconds: Option<u64>) -> Result<(), AppError> {
    match seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                    info!(seconds, "Watch period elapsed");
                }
                signal = tokio::signal::ctrl_c() => signal.map_err(InfraError::from)?,
            }
        }
        None => tokio::signal::ctrl_c().await.map_err(InfraError::from)?,
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CartReport {
    user_id: Uuid,
    summary: CartSummary,
    delivery: Vec<DeliveryEligibility>,
}

async fn run_cart(settings: Settings, args: CartArgs) -> Result<(), AppError> {
    let user = args.target.user;
    let store: Arc<dyn RemoteStore> = seed_store(&settings, &args.target)?;

    let counter = Arc::new(CounterCache::new(Arc::new(CartItemCount), store.clone()));
    counter.set_owner(Some(user));
    let carts = CartService::new(store.clone(), counter);
    let summary = CartSummary::from_lines(&carts.fetch(user).await?);

    let delivery = DeliveryTracker::new(
        store,
        Arc::new(SystemClock),
        settings.counters.delivery_orders_poll,
    );
    let report = CartReport {
        user_id: user,
        delivery: delivery.eligibility(&summary).await?,
        summary,
    };

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to render cart report: {err}")))?;
    println!("{rendered}");
    Ok(())
}
