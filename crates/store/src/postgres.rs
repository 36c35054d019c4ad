use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentIntentId, ProductId, UserId};
use domain::{
    CartItem, CartLine, Money, Order, OrderLine, OrderStatus, PaymentIntent, PaymentStatus,
    Product,
};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderQuery, OrderStats, Page, ProductQuery, Result, StoreError,
    store::{Store, StoreTransaction},
};

const PRODUCT_COLUMNS: &str =
    "id, name, slug, description, category, price_cents, stock, active, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, user_id, total_cents, status, created_at, updated_at";
const INTENT_COLUMNS: &str =
    "id, order_id, amount_cents, status, gateway_ref, created_at, updated_at";

/// How long a statement waits for a row lock before the transaction fails
/// with a retryable error.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await.inspect_err(|e| {
            tracing::warn!(error = %e, "could not open a database transaction");
        })?;
        // SET does not take bind parameters
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let pattern = query.search.as_ref().map(|term| format!("%{}%", escape_like(term)));

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM products
            WHERE active
              AND ($1::TEXT IS NULL OR name ILIKE $1)
              AND ($2::TEXT IS NULL OR category = $2)
            "#,
        )
        .bind(&pattern)
        .bind(&query.category)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE active
              AND ($1::TEXT IS NULL OR name ILIKE $1)
              AND ($2::TEXT IS NULL OR category = $2)
            ORDER BY name ASC, id ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(&pattern)
        .bind(&query.category)
        .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(query.offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.iter().map(row_to_product).collect::<Result<_>>()?,
            total: total as u64,
        })
    }

    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart_lines(&mut conn, user_id, false).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id, false).await
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders WHERE TRUE");
        push_order_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"
        ));
        push_order_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
        let rows = select.build().fetch_all(&self.pool).await?;

        let mut conn = self.pool.acquire().await?;
        let items = attach_lines(&mut conn, rows).await?;
        Ok(Page {
            items,
            total: total as u64,
        })
    }

    async fn order_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<OrderStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS orders,
                LEAST(COALESCE(SUM(total_cents), 0), 9223372036854775807)::BIGINT AS total_cents
            FROM orders
            WHERE ($1::TIMESTAMPTZ IS NULL OR created_at >= $1)
              AND ($2::TIMESTAMPTZ IS NULL OR created_at <= $2)
            GROUP BY status
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = OrderStats::default();
        for row in rows {
            let status = parse_status(&row.try_get::<String, _>("status")?)?;
            let orders: i64 = row.try_get("orders")?;
            stats.counts.insert(status, orders as u64);
            if status != OrderStatus::Cancelled {
                stats.revenue = stats
                    .revenue
                    .saturating_add(Money::from_cents(row.try_get("total_cents")?));
            }
        }
        Ok(stats)
    }

    async fn get_payment_intent(&self, id: PaymentIntentId) -> Result<Option<PaymentIntent>> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_intent).transpose()
    }
}

/// A PostgreSQL transaction. Dropping it without commit rolls back.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn insert_product(&mut self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, slug, description, category, price_cents, stock, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.price.cents())
        .bind(i64::from(product.stock))
        .bind(product.active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_product_slug")
            {
                return StoreError::Conflict(format!("slug '{}' is already taken", product.slug));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET name = $2, description = $3, category = $4, price_cents = $5, active = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.price.cents())
        .bind(product.active)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn try_decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND stock >= $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await?;

        match result.rows_affected() {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(StoreError::Corrupt(format!(
                "stock decrement touched {n} rows for product {product_id}"
            ))),
        }
    }

    async fn increment_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1 AND stock + $2 <= $3
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .bind(i64::from(u32::MAX))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        let exists = sqlx::query("SELECT 1 FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .is_some();
        Err(if exists {
            StoreError::Overflow(format!("stock of product {product_id} would overflow"))
        } else {
            StoreError::Corrupt(format!("stock increment for missing product {product_id}"))
        })
    }

    async fn get_cart_item(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, product_id, quantity, created_at, updated_at
            FROM cart_items
            WHERE user_id = $1 AND product_id = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_cart_item).transpose()
    }

    async fn upsert_cart_item(&mut self, item: &CartItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, product_id, quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, product_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(item.user_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(i64::from(item.quantity))
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn lock_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>> {
        fetch_cart_lines(&mut self.tx, user_id, true).await
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.total().cents())
        .bind(order.status().as_str())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;

        for line in order.lines() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, product_id, quantity, unit_price_cents, subtotal_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.cents())
            .bind(line.subtotal.cents())
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn get_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        fetch_order(&mut self.tx, id, true).await
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_payment_intent(&mut self, intent: &PaymentIntent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (id, order_id, amount_cents, status, gateway_ref, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(intent.id.as_uuid())
        .bind(intent.order_id.as_uuid())
        .bind(intent.amount.cents())
        .bind(intent.status.as_str())
        .bind(&intent.gateway_ref)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_pending_intent_per_order")
            {
                return StoreError::Conflict(format!(
                    "order {} already has a pending payment intent",
                    intent.order_id
                ));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn get_payment_intent_for_update(
        &mut self,
        id: PaymentIntentId,
    ) -> Result<Option<PaymentIntent>> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_intent).transpose()
    }

    async fn find_pending_intent(&mut self, order_id: OrderId) -> Result<Option<PaymentIntent>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {INTENT_COLUMNS}
            FROM payment_intents
            WHERE order_id = $1 AND status = 'pending'
            FOR UPDATE
            "#
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_intent).transpose()
    }

    async fn update_payment_intent(&mut self, intent: &PaymentIntent) -> Result<()> {
        sqlx::query("UPDATE payment_intents SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(intent.id.as_uuid())
            .bind(intent.status.as_str())
            .bind(intent.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Loads cart lines joined with products in product-id order. With `lock`,
/// both the product and the cart rows stay locked until the transaction
/// ends, always acquired in the same order.
async fn fetch_cart_lines(
    conn: &mut PgConnection,
    user_id: UserId,
    lock: bool,
) -> Result<Vec<CartLine>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT c.product_id, p.name, c.quantity, p.price_cents, p.stock, p.active
        FROM cart_items c
        JOIN products p ON p.id = c.product_id
        WHERE c.user_id = $1
        ORDER BY c.product_id ASC
        {}
        "#,
        if lock { "FOR UPDATE OF p, c" } else { "" }
    ))
    .bind(user_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CartLine {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                product_name: row.try_get("name")?,
                quantity: count_from_db(row.try_get("quantity")?)?,
                unit_price: Money::from_cents(row.try_get("price_cents")?),
                stock: count_from_db(row.try_get("stock")?)?,
                active: row.try_get("active")?,
            })
        })
        .collect()
}

async fn fetch_order(conn: &mut PgConnection, id: OrderId, lock: bool) -> Result<Option<Order>> {
    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 {}",
        if lock { "FOR UPDATE" } else { "" }
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(attach_lines(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Loads the lines of every order row and assembles the orders, keeping the
/// row order.
async fn attach_lines(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Order>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids = rows
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id"))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let line_rows = sqlx::query(
        r#"
        SELECT order_id, product_id, quantity, unit_price_cents, subtotal_cents
        FROM order_lines
        WHERE order_id = ANY($1)
        ORDER BY order_id, product_id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
    for row in &line_rows {
        lines
            .entry(row.try_get("order_id")?)
            .or_default()
            .push(OrderLine {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                quantity: count_from_db(row.try_get("quantity")?)?,
                unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            });
    }

    rows.iter()
        .map(|row| {
            let id: Uuid = row.try_get("id")?;
            Ok(Order::from_parts(
                OrderId::from_uuid(id),
                UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                lines.remove(&id).unwrap_or_default(),
                Money::from_cents(row.try_get("total_cents")?),
                parse_status(&row.try_get::<String, _>("status")?)?,
                row.try_get("created_at")?,
                row.try_get("updated_at")?,
            ))
        })
        .collect()
}

fn push_order_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &OrderQuery) {
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.as_uuid());
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(from) = query.from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = query.to {
        builder.push(" AND created_at <= ").push_bind(to);
    }
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock: count_from_db(row.try_get("stock")?)?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart_item(row: &PgRow) -> Result<CartItem> {
    Ok(CartItem {
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: count_from_db(row.try_get("quantity")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_intent(row: &PgRow) -> Result<PaymentIntent> {
    let status: String = row.try_get("status")?;
    Ok(PaymentIntent {
        id: PaymentIntentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        amount: Money::from_cents(row.try_get("amount_cents")?),
        status: status
            .parse::<PaymentStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        gateway_ref: row.try_get("gateway_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_status(raw: &str) -> Result<OrderStatus> {
    raw.parse()
        .map_err(|e: domain::DomainError| StoreError::Corrupt(e.to_string()))
}

fn count_from_db(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("count {value} out of range")))
}

/// Escapes LIKE wildcards so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn negative_counts_are_corrupt() {
        assert!(matches!(count_from_db(-1), Err(StoreError::Corrupt(_))));
        assert!(matches!(
            count_from_db(i64::from(u32::MAX) + 1),
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(count_from_db(i64::from(u32::MAX)).unwrap(), u32::MAX);
    }
}
