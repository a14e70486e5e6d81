use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::response::query_result::QueryResult;
use scylla::serialize::row::SerializeRow;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::audit::ReferenceEpoch;
use crate::domain::order::{Order, OrderItem, OrderStatus};
use crate::domain::product::{Product, StockHistoryEntry};
use super::{EngineConfigStore, OrderStore, ProductStore, StockHistoryFeed};

// ============================================================================
// ScyllaDB Store
// ============================================================================
//
// Tables:
// - products        - one row per product; stock writes are LWTs on `version`
// - orders          - order rows; status changes are LWTs on `status`
// - orders_by_user  - (user_id, created_at) index for duplicate detection
// - order_items     - items partitioned by order
// - stock_history   - append-only stock additions
// - engine_config   - single versioned row for the reference epoch
//
// An order, its user index entry and its items are written in one logged
// batch, so the store reports atomic writes.
//
// ============================================================================

const EPOCH_KEY: &str = "reference_epoch";

const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS products (
        id uuid PRIMARY KEY, title text, price bigint, sizes map<text, int>,
        in_stock boolean, version bigint, created_at timestamp, updated_at timestamp
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id uuid PRIMARY KEY, user_id uuid, total_amount bigint, status text,
        customer_name text, shipping_address text, shipping_phone text, notes text,
        created_at timestamp, updated_at timestamp, is_deleted boolean, inventory_restored boolean
    )",
    "CREATE TABLE IF NOT EXISTS orders_by_user (
        user_id uuid, created_at timestamp, order_id uuid,
        PRIMARY KEY (user_id, created_at, order_id)
    ) WITH CLUSTERING ORDER BY (created_at DESC, order_id ASC)",
    "CREATE TABLE IF NOT EXISTS order_items (
        order_id uuid, id uuid, product_id uuid, size text, color text,
        quantity int, unit_price bigint, title text, image_url text,
        PRIMARY KEY (order_id, id)
    )",
    "CREATE TABLE IF NOT EXISTS stock_history (
        product_id uuid, created_at timestamp, id uuid, sizes_added map<text, int>,
        total_added int, admin_id text,
        PRIMARY KEY (product_id, created_at, id)
    )",
    "CREATE TABLE IF NOT EXISTS engine_config (
        key text PRIMARY KEY, reference_epoch timestamp, version bigint,
        updated_by text, updated_at timestamp
    )",
];

const PRODUCT_COLUMNS: &str = "id, title, price, sizes, in_stock, version, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, user_id, total_amount, status, customer_name, shipping_address, \
     shipping_phone, notes, created_at, updated_at, is_deleted, inventory_restored";
const ITEM_COLUMNS: &str = "id, order_id, product_id, size, color, quantity, unit_price, title, image_url";

const INSERT_ORDER: &str = "INSERT INTO orders (id, user_id, total_amount, status, customer_name, \
     shipping_address, shipping_phone, notes, created_at, updated_at, is_deleted, inventory_restored) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
const INSERT_ORDER_BY_USER: &str =
    "INSERT INTO orders_by_user (user_id, created_at, order_id) VALUES (?, ?, ?)";
const INSERT_ITEM: &str = "INSERT INTO order_items (id, order_id, product_id, size, color, quantity, \
     unit_price, title, image_url) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

type ProductRow = (Uuid, String, i64, Option<BTreeMap<String, i32>>, bool, i64, DateTime<Utc>, DateTime<Utc>);
type OrderRow = (
    Uuid,
    Uuid,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<bool>,
    Option<bool>,
);
type ItemRow = (Uuid, Uuid, Uuid, String, Option<String>, i32, i64, String, Option<String>);
type HistoryRow = (Uuid, Uuid, Option<BTreeMap<String, i32>>, i32, String, DateTime<Utc>);

pub struct ScyllaStore {
    session: Arc<Session>,
}

impl ScyllaStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Connect, create the keyspace and tables if needed, and switch to it.
    pub async fn connect(nodes: &[String], keyspace: &str) -> Result<Self> {
        tracing::info!(nodes = ?nodes, keyspace = %keyspace, "Connecting to ScyllaDB");

        let session: Session = SessionBuilder::new()
            .known_nodes(nodes)
            .build()
            .await
            .context("Failed to connect to ScyllaDB")?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    keyspace
                ),
                &[],
            )
            .await?;
        session.use_keyspace(keyspace, false).await?;

        for statement in SCHEMA {
            session.query_unpaged(statement, &[]).await?;
        }

        tracing::info!(keyspace = %keyspace, "ScyllaDB schema ready");
        Ok(Self::new(Arc::new(session)))
    }

    async fn items_for(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT {} FROM order_items WHERE order_id = ?", ITEM_COLUMNS),
                (order_id,),
            )
            .await?;

        let rows = result.into_rows_result()?;
        let mut items = Vec::new();
        for row in rows.rows::<ItemRow>()? {
            items.push(item_from_row(row?));
        }
        Ok(items)
    }
}

/// First column of an LWT response is `[applied]`.
fn was_applied(result: QueryResult) -> Result<bool> {
    let rows = result.into_rows_result()?;
    let row: Row = rows.first_row()?;
    Ok(matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true)))))
}

fn product_from_row(row: ProductRow) -> Product {
    let (id, title, price, sizes, in_stock, version, created_at, updated_at) = row;
    Product {
        id,
        title,
        price,
        sizes: sizes.unwrap_or_default(),
        in_stock,
        version,
        created_at,
        updated_at,
    }
}

fn order_from_row(row: OrderRow) -> Result<Order> {
    let (
        id,
        user_id,
        total_amount,
        status,
        customer_name,
        shipping_address,
        shipping_phone,
        notes,
        created_at,
        updated_at,
        is_deleted,
        inventory_restored,
    ) = row;

    Ok(Order {
        id,
        user_id,
        total_amount,
        status: status.parse::<OrderStatus>()?,
        customer_name,
        shipping_address,
        shipping_phone,
        notes,
        created_at,
        updated_at,
        is_deleted: is_deleted.unwrap_or(false),
        inventory_restored: inventory_restored.unwrap_or(false),
        items: Vec::new(),
    })
}

fn item_from_row(row: ItemRow) -> OrderItem {
    let (id, order_id, product_id, size, color, quantity, unit_price, title, image_url) = row;
    OrderItem {
        id,
        order_id,
        product_id,
        size,
        color,
        quantity,
        unit_price,
        title,
        image_url,
    }
}

/// Batch values are held across an await inside `#[async_trait]` methods.
type BatchRow = Box<dyn SerializeRow + Send + Sync>;

/// Order row, its user index entry and its items as one logged batch.
fn order_batch(order: &Order, items: &[OrderItem]) -> (Batch, Vec<BatchRow>) {
    let mut batch = Batch::default();
    let mut values: Vec<BatchRow> = Vec::with_capacity(items.len() + 2);

    batch.append_statement(INSERT_ORDER);
    values.push(Box::new(order_values(order)));

    batch.append_statement(INSERT_ORDER_BY_USER);
    values.push(Box::new((order.user_id, order.created_at, order.id)));

    for item in items {
        batch.append_statement(INSERT_ITEM);
        values.push(Box::new(item_values(item)));
    }

    (batch, values)
}

fn order_values(order: &Order) -> impl SerializeRow + Send + Sync + 'static {
    (
        order.id,
        order.user_id,
        order.total_amount,
        order.status.as_str().to_string(),
        order.customer_name.clone(),
        order.shipping_address.clone(),
        order.shipping_phone.clone(),
        order.notes.clone(),
        order.created_at,
        order.updated_at,
        order.is_deleted,
        order.inventory_restored,
    )
}

fn item_values(item: &OrderItem) -> impl SerializeRow + Send + Sync + 'static {
    (
        item.id,
        item.order_id,
        item.product_id,
        item.size.clone(),
        item.color.clone(),
        item.quantity,
        item.unit_price,
        item.title.clone(),
        item.image_url.clone(),
    )
}

#[async_trait]
impl ProductStore for ScyllaStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let result = self
            .session
            .query_unpaged(format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS), (id,))
            .await?;

        let rows = result.into_rows_result()?;
        Ok(rows.maybe_first_row::<ProductRow>()?.map(product_from_row))
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.session
            .query_unpaged(
                format!("INSERT INTO products ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)", PRODUCT_COLUMNS),
                (
                    product.id,
                    &product.title,
                    product.price,
                    &product.sizes,
                    product.in_stock,
                    product.version,
                    product.created_at,
                    product.updated_at,
                ),
            )
            .await?;
        Ok(())
    }

    async fn compare_and_set_stock(&self, product: &Product, expected_version: i64) -> Result<bool> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE products SET sizes = ?, in_stock = ?, version = ?, updated_at = ? \
                 WHERE id = ? IF version = ?",
                (
                    &product.sizes,
                    product.in_stock,
                    product.version,
                    product.updated_at,
                    product.id,
                    expected_version,
                ),
            )
            .await?;

        was_applied(result)
    }

    async fn list_products_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Product>> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT {} FROM products WHERE created_at >= ? ALLOW FILTERING", PRODUCT_COLUMNS),
                (since,),
            )
            .await?;

        let rows = result.into_rows_result()?;
        let mut products = Vec::new();
        for row in rows.rows::<ProductRow>()? {
            products.push(product_from_row(row?));
        }
        Ok(products)
    }
}

#[async_trait]
impl OrderStore for ScyllaStore {
    fn supports_atomic_writes(&self) -> bool {
        true
    }

    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        let (batch, values) = order_batch(order, items);
        self.session.batch(&batch, values).await?;

        tracing::debug!(
            order_id = %order.id,
            item_count = items.len(),
            "Wrote order and items in one batch"
        );
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut batch = Batch::default();
        batch.append_statement(INSERT_ORDER);
        batch.append_statement(INSERT_ORDER_BY_USER);

        self.session
            .batch(&batch, (order_values(order), (order.user_id, order.created_at, order.id)))
            .await?;
        Ok(())
    }

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut batch = Batch::default();
        let mut values: Vec<BatchRow> = Vec::with_capacity(items.len());
        for item in items {
            batch.append_statement(INSERT_ITEM);
            values.push(Box::new(item_values(item)));
        }

        self.session.batch(&batch, values).await?;
        Ok(())
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        let Some(order) = self.get_order(id).await? else {
            return Ok(());
        };

        let mut batch = Batch::default();
        batch.append_statement("DELETE FROM orders WHERE id = ?");
        batch.append_statement("DELETE FROM orders_by_user WHERE user_id = ? AND created_at = ? AND order_id = ?");
        batch.append_statement("DELETE FROM order_items WHERE order_id = ?");

        self.session
            .batch(&batch, ((id,), (order.user_id, order.created_at, id), (id,)))
            .await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let result = self
            .session
            .query_unpaged(format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS), (id,))
            .await?;

        let rows = result.into_rows_result()?;
        rows.maybe_first_row::<OrderRow>()?.map(order_from_row).transpose()
    }

    async fn get_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        self.items_for(order_id).await
    }

    async fn recent_orders_for_user(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Order>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT order_id FROM orders_by_user WHERE user_id = ? AND created_at >= ?",
                (user_id, since),
            )
            .await?;

        let rows = result.into_rows_result()?;
        let mut orders = Vec::new();
        for row in rows.rows::<(Uuid,)>()? {
            let (order_id,) = row?;
            if let Some(order) = self.get_order(order_id).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn update_order_if_status(&self, order: &Order, expected_status: OrderStatus) -> Result<bool> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE orders SET status = ?, is_deleted = ?, inventory_restored = ?, updated_at = ? \
                 WHERE id = ? IF status = ? AND is_deleted = false",
                (
                    order.status.as_str(),
                    order.is_deleted,
                    order.inventory_restored,
                    order.updated_at,
                    order.id,
                    expected_status.as_str(),
                ),
            )
            .await?;

        was_applied(result)
    }

    async fn list_orders_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT {} FROM orders WHERE created_at >= ? ALLOW FILTERING", ORDER_COLUMNS),
                (since,),
            )
            .await?;

        let rows = result.into_rows_result()?;
        let mut orders = Vec::new();
        for row in rows.rows::<OrderRow>()? {
            let mut order = order_from_row(row?)?;
            order.items = self.items_for(order.id).await?;
            orders.push(order);
        }
        Ok(orders)
    }
}

#[async_trait]
impl StockHistoryFeed for ScyllaStore {
    async fn append_entry(&self, entry: &StockHistoryEntry) -> Result<()> {
        self.session
            .query_unpaged(
                "INSERT INTO stock_history (product_id, created_at, id, sizes_added, total_added, admin_id) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    entry.product_id,
                    entry.created_at,
                    entry.id,
                    &entry.sizes_added,
                    entry.total_added,
                    &entry.admin_id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<StockHistoryEntry>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT id, product_id, sizes_added, total_added, admin_id, created_at \
                 FROM stock_history WHERE created_at >= ? ALLOW FILTERING",
                (since,),
            )
            .await?;

        let rows = result.into_rows_result()?;
        let mut entries = Vec::new();
        for row in rows.rows::<HistoryRow>()? {
            let (id, product_id, sizes_added, total_added, admin_id, created_at) = row?;
            entries.push(StockHistoryEntry {
                id,
                product_id,
                sizes_added: sizes_added.unwrap_or_default(),
                total_added,
                admin_id,
                created_at,
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl EngineConfigStore for ScyllaStore {
    async fn get_reference_epoch(&self) -> Result<Option<ReferenceEpoch>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT reference_epoch, version, updated_by, updated_at FROM engine_config WHERE key = ?",
                (EPOCH_KEY,),
            )
            .await?;

        let rows = result.into_rows_result()?;
        Ok(rows
            .maybe_first_row::<(DateTime<Utc>, i64, Option<String>, Option<DateTime<Utc>>)>()?
            .map(|(epoch, version, updated_by, updated_at)| ReferenceEpoch {
                epoch,
                version,
                updated_by,
                updated_at,
            }))
    }

    async fn put_reference_epoch(&self, epoch: &ReferenceEpoch, expected_version: Option<i64>) -> Result<bool> {
        let result = match expected_version {
            None => {
                self.session
                    .query_unpaged(
                        "INSERT INTO engine_config (key, reference_epoch, version, updated_by, updated_at) \
                         VALUES (?, ?, ?, ?, ?) IF NOT EXISTS",
                        (EPOCH_KEY, epoch.epoch, epoch.version, &epoch.updated_by, epoch.updated_at),
                    )
                    .await?
            }
            Some(expected) => {
                self.session
                    .query_unpaged(
                        "UPDATE engine_config SET reference_epoch = ?, version = ?, updated_by = ?, updated_at = ? \
                         WHERE key = ? IF version = ?",
                        (epoch.epoch, epoch.version, &epoch.updated_by, epoch.updated_at, EPOCH_KEY, expected),
                    )
                    .await?
            }
        };

        was_applied(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn is_send_sync<T: Send + Sync>(_: &T) {}

    fn order_with_items(count: usize) -> (Order, Vec<OrderItem>) {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_amount: 1000 * count as i64,
            status: OrderStatus::Pending,
            customer_name: None,
            shipping_address: None,
            shipping_phone: Some("0707070707".to_string()),
            notes: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            inventory_restored: false,
            items: Vec::new(),
        };
        let items = (0..count)
            .map(|_| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id: Uuid::new_v4(),
                size: "M".to_string(),
                color: None,
                quantity: 1,
                unit_price: 1000,
                title: "Pagne".to_string(),
                image_url: None,
            })
            .collect();
        (order, items)
    }

    #[test]
    fn test_order_batch_covers_order_index_and_items() {
        let (order, items) = order_with_items(3);

        let (batch, values) = order_batch(&order, &items);

        assert_eq!(batch.statements.len(), 5);
        assert_eq!(values.len(), 5);
        is_send_sync(&values);
    }

    #[test]
    fn test_order_status_survives_row_mapping() {
        let (order, _) = order_with_items(0);
        let row: OrderRow = (
            order.id,
            order.user_id,
            order.total_amount,
            "shipped".to_string(),
            None,
            None,
            order.shipping_phone.clone(),
            None,
            order.created_at,
            order.updated_at,
            None,
            Some(true),
        );

        let mapped = order_from_row(row).unwrap();

        assert_eq!(mapped.status, OrderStatus::Shipped);
        assert!(!mapped.is_deleted);
        assert!(mapped.inventory_restored);
    }
}
