use std::collections::BTreeMap;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod domain;
mod engine;
mod metrics;
mod notify;
mod store;
mod utils;

use config::{Config, StoreBackend};
use domain::order::{CartLine, CheckoutPayload, OrderError, OrderStatus};
use domain::product::{Product, StockHistoryEntry};
use domain::AdminContext;
use engine::{OrderEngine, Stores};
use notify::{LogNotifier, NotificationDispatcher, RedpandaNotifier};
use store::{MemoryStore, ProductStore, ScyllaStore, StockHistoryFeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,storefront_orders=debug"))
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(backend = ?config.store_backend, "🚀 Starting storefront order engine");

    // === 1. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let server_metrics = metrics.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new()
            .block_on(metrics::start_metrics_server(server_metrics, metrics_port));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Storage ===
    let stores = match config.store_backend {
        StoreBackend::Scylla => {
            tracing::info!(nodes = ?config.scylla_nodes, "Connecting to ScyllaDB...");
            Stores::shared(Arc::new(
                ScyllaStore::connect(&config.scylla_nodes, &config.scylla_keyspace).await?,
            ))
        }
        StoreBackend::Memory => Stores::shared(Arc::new(MemoryStore::new())),
    };

    // === 3. Notifications ===
    let notifier: Arc<dyn NotificationDispatcher> = match &config.redpanda_brokers {
        Some(brokers) => {
            tracing::info!(brokers = %brokers, topic = %config.notification_topic, "Publishing notifications to Redpanda");
            Arc::new(RedpandaNotifier::new(brokers, &config.notification_topic, metrics.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    let engine = OrderEngine::new(stores.clone(), notifier, metrics.clone(), config.engine.clone());

    // === 4. Demonstrate the order lifecycle ===
    run_demo(&engine, &stores).await?;

    tracing::info!("🎉 Demo complete! Metrics on http://0.0.0.0:{}/metrics, Ctrl+C to exit", config.metrics_port);
    tokio::signal::ctrl_c().await?;

    Ok(())
}

async fn run_demo(engine: &OrderEngine, stores: &Stores) -> anyhow::Result<()> {
    let admin = AdminContext::new("demo-admin");

    // Product management normally owns these writes
    let sizes = BTreeMap::from([("M".to_string(), 5), ("L".to_string(), 3)]);
    let product = Product::new("Boubou brodé", 15000, sizes.clone());
    stores.products.insert_product(&product).await?;
    stores
        .history
        .append_entry(&StockHistoryEntry::new(product.id, sizes, admin.admin_id()))
        .await?;
    tracing::info!(product_id = %product.id, "📦 Seeded product");

    let payload = demo_payload(&product, "M", 2, "0707070707");
    let order = engine.create_order(payload.clone()).await?;
    tracing::info!(order_id = %order.id, total = order.total_amount, "✅ Order created");

    // Double click on the checkout button
    match engine.create_order(payload).await {
        Err(OrderError::DuplicateOrder { existing_order_id }) => {
            tracing::info!(existing_order_id = %existing_order_id, "🛑 Duplicate checkout suppressed");
        }
        Err(e) => return Err(e.into()),
        Ok(dup) => tracing::warn!(order_id = %dup.id, "Duplicate checkout was not suppressed"),
    }

    engine.cancel_order(&admin, order.id).await?;
    tracing::info!(order_id = %order.id, "✅ Order cancelled, stock restored");

    // A second customer's order goes through fulfilment
    let shipped = engine
        .create_order(demo_payload(&product, "L", 1, "0101010101"))
        .await?;
    engine
        .update_order_status(&admin, shipped.id, OrderStatus::Confirmed)
        .await?;
    engine
        .update_order_status(&admin, shipped.id, OrderStatus::Shipped)
        .await?;
    tracing::info!(order_id = %shipped.id, "🚚 Order shipped");

    // Confirmed as a duplicate by support, so it is purged without giving stock back
    let copy = engine
        .create_order(demo_payload(&product, "L", 1, "0202020202"))
        .await?;
    engine.purge_duplicate_order(&admin, copy.id).await?;
    tracing::info!(order_id = %copy.id, "🧹 Duplicate order purged");

    engine.soft_delete_order(&admin, order.id).await?;
    tracing::info!(order_id = %order.id, "🗑️ Cancelled order hidden");

    let epoch = engine.current_reference_epoch().await?;
    let rows = engine.run_audit(&admin, epoch.epoch).await?;
    tracing::info!(epoch = %epoch.epoch, rows = rows.len(), "🔍 Audit finished");
    println!("{}", engine.audit_csv(&rows));

    // Start the next audit period from now
    let rebased = engine.rebase_reference_epoch(&admin, chrono::Utc::now()).await?;
    let rows = engine.run_current_audit(&admin).await?;
    tracing::info!(epoch = %rebased.epoch, version = rebased.version, rows = rows.len(), "📅 Reference epoch rebased");

    Ok(())
}

fn demo_payload(product: &Product, size: &str, quantity: i32, phone: &str) -> CheckoutPayload {
    CheckoutPayload {
        user_id: uuid::Uuid::new_v4(),
        customer_name: Some("Aminata Koné".to_string()),
        items: vec![CartLine {
            product_id: product.id,
            title: product.title.clone(),
            price: product.price,
            image_url: None,
            size: size.to_string(),
            color: None,
            quantity,
        }],
        shipping_address: Some("Cocody, Abidjan".to_string()),
        shipping_phone: Some(phone.to_string()),
        notes: None,
    }
}
