//! `PostgreSQL` repository.
//!
//! Schema lives in `shop/migrations`. The `products` table enforces the
//! stock invariants with `CHECK` constraints, so a bug upstream surfaces as
//! a failed write instead of corrupt counters.

use super::{CheckoutRepository, CheckoutSnapshot, RepositoryError};
use crate::types::{
    CustomerContact, Money, Order, OrderId, OrderStatus, PaymentIntentId, Product, ProductId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmstand_auth::UserId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: uuid::Uuid,
    name: String,
    description: String,
    unit_price_cents: i64,
    inventory: i64,
    reserved: i64,
    version: i64,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            unit_price: Money::from_cents(to_unsigned(row.unit_price_cents, "unit_price_cents")?),
            inventory: to_count(row.inventory, "inventory")?,
            reserved: to_count(row.reserved, "reserved")?,
            version: to_unsigned(row.version, "version")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    product_id: uuid::Uuid,
    quantity: i64,
    unit_price_cents: i64,
    total_cents: i64,
    status: String,
    failure_reason: Option<String>,
    payment_intent_id: Option<String>,
    client_secret: Option<String>,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    shipping_address: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reservation_expires_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    confirmation_sent_at: Option<DateTime<Utc>>,
    refund_requested_at: Option<DateTime<Utc>>,
    refund_id: Option<String>,
    version: i64,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(RepositoryError::Corrupt)?;

        Ok(Self {
            id: OrderId::from_uuid(row.id),
            user_id: UserId(row.user_id),
            product_id: ProductId::from_uuid(row.product_id),
            quantity: to_count(row.quantity, "quantity")?,
            unit_price: Money::from_cents(to_unsigned(row.unit_price_cents, "unit_price_cents")?),
            total: Money::from_cents(to_unsigned(row.total_cents, "total_cents")?),
            status,
            failure_reason: row.failure_reason,
            payment_intent_id: row.payment_intent_id.map(PaymentIntentId::new),
            client_secret: row.client_secret,
            contact: CustomerContact {
                name: row.customer_name,
                email: row.customer_email,
                phone: row.customer_phone,
                shipping_address: row.shipping_address,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
            reservation_expires_at: row.reservation_expires_at,
            completed_at: row.completed_at,
            confirmation_sent_at: row.confirmation_sent_at,
            refund_requested_at: row.refund_requested_at,
            refund_id: row.refund_id,
            version: to_unsigned(row.version, "version")?,
        })
    }
}

fn to_unsigned(value: i64, column: &str) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("{column} is negative: {value}")))
}

fn to_count(value: i64, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_signed(value: u64, column: &str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("{column} too large: {value}")))
}

/// `PostgreSQL` checkout repository.
#[derive(Clone)]
pub struct PostgresCheckoutRepository {
    pool: PgPool,
}

impl PostgresCheckoutRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the connection or a
    /// migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("migration failed: {e}")))?;

        tracing::info!("Database migrations applied");
        Ok(Self { pool })
    }

    /// The underlying pool, shared with the auth stores.
    #[must_use]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

const UPSERT_PRODUCT: &str = r"
    INSERT INTO products (id, name, description, unit_price_cents, inventory, reserved, version)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name,
            description = EXCLUDED.description,
            unit_price_cents = EXCLUDED.unit_price_cents,
            inventory = EXCLUDED.inventory,
            reserved = EXCLUDED.reserved,
            version = EXCLUDED.version
        WHERE products.version <= EXCLUDED.version
";

async fn upsert_product<'e, E>(executor: E, product: &Product) -> Result<(), RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(UPSERT_PRODUCT)
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(to_signed(product.unit_price.cents(), "unit_price_cents")?)
        .bind(i64::from(product.inventory))
        .bind(i64::from(product.reserved))
        .bind(to_signed(product.version, "version")?)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl CheckoutRepository for PostgresCheckoutRepository {
    async fn load_snapshot(&self) -> Result<CheckoutSnapshot, RepositoryError> {
        let products = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, description, unit_price_cents, inventory, reserved, version
            FROM products
            ",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Product::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let orders = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, product_id, quantity, unit_price_cents, total_cents, status,
                   failure_reason, payment_intent_id, client_secret, customer_name,
                   customer_email, customer_phone, shipping_address, created_at, updated_at,
                   reservation_expires_at, completed_at, confirmation_sent_at,
                   refund_requested_at, refund_id, version
            FROM orders
            ",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Order::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            products = products.len(),
            orders = orders.len(),
            "Loaded checkout snapshot"
        );
        Ok(CheckoutSnapshot { products, orders })
    }

    async fn save_product(&self, product: &Product) -> Result<(), RepositoryError> {
        upsert_product(&self.pool, product).await
    }

    async fn save_order(&self, order: &Order, product: &Product) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Product first: the order row references it
        upsert_product(&mut *tx, product).await?;

        sqlx::query(
            r"
            INSERT INTO orders (
                id, user_id, product_id, quantity, unit_price_cents, total_cents, status,
                failure_reason, payment_intent_id, client_secret, customer_name,
                customer_email, customer_phone, shipping_address, created_at, updated_at,
                reservation_expires_at, completed_at, confirmation_sent_at,
                refund_requested_at, refund_id, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    failure_reason = EXCLUDED.failure_reason,
                    payment_intent_id = EXCLUDED.payment_intent_id,
                    client_secret = EXCLUDED.client_secret,
                    updated_at = EXCLUDED.updated_at,
                    completed_at = EXCLUDED.completed_at,
                    confirmation_sent_at = EXCLUDED.confirmation_sent_at,
                    refund_requested_at = EXCLUDED.refund_requested_at,
                    refund_id = EXCLUDED.refund_id,
                    version = EXCLUDED.version
                WHERE orders.version <= EXCLUDED.version
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.0)
        .bind(order.product_id.as_uuid())
        .bind(i64::from(order.quantity))
        .bind(to_signed(order.unit_price.cents(), "unit_price_cents")?)
        .bind(to_signed(order.total.cents(), "total_cents")?)
        .bind(order.status.as_str())
        .bind(&order.failure_reason)
        .bind(order.payment_intent_id.as_ref().map(PaymentIntentId::as_str))
        .bind(&order.client_secret)
        .bind(&order.contact.name)
        .bind(&order.contact.email)
        .bind(&order.contact.phone)
        .bind(&order.contact.shipping_address)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.reservation_expires_at)
        .bind(order.completed_at)
        .bind(order.confirmation_sent_at)
        .bind(order.refund_requested_at)
        .bind(&order.refund_id)
        .bind(to_signed(order.version, "version")?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_counters_are_corrupt() {
        let row = ProductRow {
            id: uuid::Uuid::new_v4(),
            name: "Eggs".to_string(),
            description: String::new(),
            unit_price_cents: 600,
            inventory: -1,
            reserved: 0,
            version: 0,
        };
        assert!(matches!(Product::try_from(row), Err(RepositoryError::Corrupt(_))));
    }
}
