use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, PaymentReference, SkuId};

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    CartLine, CartRecord, CartStatus, CartView, CheckoutError, Order, OrderLine, OrderStatus,
    Result, StockLevel,
    store::{CheckoutStore, MAX_QUANTITY, ReclaimedCart},
};

/// Bounded wait for row locks before failing with a retryable
/// `Contention` error. Flash-sale traffic on a hot SKU must degrade to
/// retries, not queue indefinitely.
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// SQLSTATE raised by PostgreSQL when `lock_timeout` elapses.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// PostgreSQL-backed checkout store.
///
/// Every mutation runs in one transaction with a uniform lock order (cart
/// row first, then SKU rows), so the ledger and the reservation store move
/// together and concurrent mutations cannot deadlock across the two
/// tables.
#[derive(Clone)]
pub struct PostgresCheckoutStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PostgresCheckoutStore {
    /// Creates a new PostgreSQL checkout store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    /// Overrides the bounded lock wait.
    pub fn with_lock_timeout_ms(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is a trusted u64.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        Ok(tx)
    }

    fn map_lock_error(err: sqlx::Error, resource: &str) -> CheckoutError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
        {
            return CheckoutError::Contention {
                resource: resource.to_string(),
            };
        }
        CheckoutError::Database(err)
    }

    fn row_to_cart(cart_id: CartId, row: &PgRow) -> Result<CartRecord> {
        let status_str: String = row.try_get("status")?;
        let status = CartStatus::parse(&status_str).ok_or_else(|| {
            CheckoutError::Database(sqlx::Error::Decode(
                format!("unknown cart status: {status_str}").into(),
            ))
        })?;
        Ok(CartRecord {
            id: cart_id,
            status,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    /// Locks the cart row for the rest of the transaction.
    async fn lock_cart(conn: &mut PgConnection, cart_id: CartId) -> Result<Option<CartRecord>> {
        let row = sqlx::query("SELECT status, created_at, expires_at FROM carts WHERE id = $1 FOR UPDATE")
            .bind(cart_id.as_uuid())
            .fetch_optional(conn)
            .await
            .map_err(|e| Self::map_lock_error(e, "cart"))?;
        row.map(|row| Self::row_to_cart(cart_id, &row)).transpose()
    }

    fn check_live(cart: &CartRecord, now: DateTime<Utc>) -> Result<()> {
        match cart.status {
            CartStatus::Settled => Err(CheckoutError::AlreadySettled(cart.id)),
            CartStatus::Reclaimed => Err(CheckoutError::CartExpiredOrMissing(cart.id)),
            CartStatus::Active if cart.expires_at <= now => {
                Err(CheckoutError::CartExpiredOrMissing(cart.id))
            }
            CartStatus::Active => Ok(()),
        }
    }

    /// Atomically decrements the ledger, returning the validated quantity.
    /// The conditional UPDATE is the compare-and-swap: zero rows affected
    /// means insufficient stock (or no such SKU), and the enclosing
    /// transaction rolls back with no partial decrement.
    async fn reserve_stock(conn: &mut PgConnection, sku: &SkuId, quantity: u32) -> Result<i32> {
        if quantity > MAX_QUANTITY {
            return Err(CheckoutError::QuantityTooLarge(quantity));
        }
        let quantity = quantity as i32;

        let result = sqlx::query(
            r#"
            UPDATE skus
            SET available = available - $2, version = version + 1, updated_at = now()
            WHERE id = $1 AND available >= $2
            "#,
        )
        .bind(sku.as_str())
        .bind(quantity)
        .execute(&mut *conn)
        .await
        .map_err(|e| Self::map_lock_error(e, sku.as_str()))?;

        if result.rows_affected() == 0 {
            let available: Option<i32> =
                sqlx::query_scalar("SELECT available FROM skus WHERE id = $1")
                    .bind(sku.as_str())
                    .fetch_optional(conn)
                    .await?;
            return Err(match available {
                Some(available) => CheckoutError::OutOfStock {
                    sku: sku.clone(),
                    requested: quantity as u32,
                    available: available as u32,
                },
                None => CheckoutError::UnknownSku(sku.clone()),
            });
        }
        Ok(quantity)
    }

    // Precondition: paired exactly once with a prior successful reserve.
    async fn release_stock(conn: &mut PgConnection, sku: &SkuId, quantity: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE skus
            SET available = available + $2, version = version + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(sku.as_str())
        .bind(quantity)
        .execute(conn)
        .await
        .map_err(|e| Self::map_lock_error(e, sku.as_str()))?;
        Ok(())
    }

    async fn read_cart_view(conn: &mut PgConnection, cart_id: CartId) -> Result<CartView> {
        let expires_at: DateTime<Utc> =
            sqlx::query_scalar("SELECT expires_at FROM carts WHERE id = $1")
                .bind(cart_id.as_uuid())
                .fetch_one(&mut *conn)
                .await?;

        let rows = sqlx::query(
            r#"
            SELECT r.sku_id, r.quantity, s.unit_price_cents
            FROM reservations r
            JOIN skus s ON s.id = r.sku_id
            WHERE r.cart_id = $1
            ORDER BY r.sku_id
            "#,
        )
        .bind(cart_id.as_uuid())
        .fetch_all(conn)
        .await?;

        let lines = rows
            .into_iter()
            .map(|row| {
                Ok(CartLine {
                    sku: SkuId::new(row.try_get::<String, _>("sku_id")?),
                    quantity: row.try_get::<i32, _>("quantity")? as u32,
                    unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CartView {
            cart_id,
            lines,
            expires_at,
        })
    }

    fn row_to_order_header(
        row: &PgRow,
    ) -> Result<(OrderId, PaymentReference, OrderStatus, DateTime<Utc>)> {
        let status_str: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status_str).ok_or_else(|| {
            CheckoutError::Database(sqlx::Error::Decode(
                format!("unknown order status: {status_str}").into(),
            ))
        })?;
        Ok((
            OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            PaymentReference::new(row.try_get::<String, _>("payment_reference")?),
            status,
            row.try_get("created_at")?,
        ))
    }

    async fn load_order_lines(conn: &mut PgConnection, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            r#"
            SELECT sku_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY sku_id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(conn)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OrderLine {
                    sku: SkuId::new(row.try_get::<String, _>("sku_id")?),
                    quantity: row.try_get::<i32, _>("quantity")? as u32,
                    unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                })
            })
            .collect()
    }

    async fn load_order_by_reference(
        conn: &mut PgConnection,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, payment_reference, status, created_at FROM orders WHERE payment_reference = $1",
        )
        .bind(payment_reference.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let (id, payment_reference, status, created_at) = Self::row_to_order_header(&row)?;
        let lines = Self::load_order_lines(conn, id).await?;
        Ok(Some(Order {
            id,
            payment_reference,
            status,
            created_at,
            lines,
        }))
    }
}

#[async_trait]
impl CheckoutStore for PostgresCheckoutStore {
    async fn upsert_sku(
        &self,
        sku: &SkuId,
        available: u32,
        unit_price: Money,
    ) -> Result<StockLevel> {
        if available > MAX_QUANTITY {
            return Err(CheckoutError::QuantityTooLarge(available));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO skus (id, available, unit_price_cents, version)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (id) DO UPDATE
            SET available = EXCLUDED.available,
                unit_price_cents = EXCLUDED.unit_price_cents,
                version = skus.version + 1,
                updated_at = now()
            RETURNING available, unit_price_cents, version
            "#,
        )
        .bind(sku.as_str())
        .bind(available as i32)
        .bind(unit_price.cents())
        .fetch_one(&self.pool)
        .await?;

        Ok(StockLevel {
            sku: sku.clone(),
            available: row.try_get::<i32, _>("available")? as u32,
            version: row.try_get("version")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        })
    }

    async fn stock_level(&self, sku: &SkuId) -> Result<Option<StockLevel>> {
        let row =
            sqlx::query("SELECT available, unit_price_cents, version FROM skus WHERE id = $1")
                .bind(sku.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| {
            Ok(StockLevel {
                sku: sku.clone(),
                available: row.try_get::<i32, _>("available")? as u32,
                version: row.try_get("version")?,
                unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            })
        })
        .transpose()
    }

    async fn add_item(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<CartView> {
        let mut tx = self.begin().await?;

        match Self::lock_cart(&mut tx, cart_id).await? {
            Some(cart) => Self::check_live(&cart, now)?,
            None => {
                sqlx::query(
                    "INSERT INTO carts (id, status, created_at, expires_at) VALUES ($1, 'active', $2, $3)",
                )
                .bind(cart_id.as_uuid())
                .bind(now)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        let quantity = Self::reserve_stock(&mut tx, sku, quantity).await?;

        sqlx::query(
            r#"
            INSERT INTO reservations (cart_id, sku_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, sku_id)
            DO UPDATE SET quantity = reservations.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(sku.as_str())
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        // Sliding TTL: activity on the cart pushes its expiry out.
        sqlx::query("UPDATE carts SET expires_at = $2 WHERE id = $1")
            .bind(cart_id.as_uuid())
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;

        let view = Self::read_cart_view(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn update_quantity(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        new_quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<CartView> {
        if new_quantity == 0 {
            return self.remove_item(cart_id, sku, now).await;
        }

        let mut tx = self.begin().await?;

        let cart = Self::lock_cart(&mut tx, cart_id)
            .await?
            .ok_or(CheckoutError::CartExpiredOrMissing(cart_id))?;
        Self::check_live(&cart, now)?;

        let current: Option<i32> =
            sqlx::query_scalar("SELECT quantity FROM reservations WHERE cart_id = $1 AND sku_id = $2")
                .bind(cart_id.as_uuid())
                .bind(sku.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.unwrap_or(0) as u32;

        if new_quantity > current {
            Self::reserve_stock(&mut tx, sku, new_quantity - current).await?;
        } else if new_quantity < current {
            Self::release_stock(&mut tx, sku, (current - new_quantity) as i32).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO reservations (cart_id, sku_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, sku_id)
            DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(sku.as_str())
        .bind(new_quantity as i32)
        .execute(&mut *tx)
        .await?;

        let view = Self::read_cart_view(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn remove_item(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        now: DateTime<Utc>,
    ) -> Result<CartView> {
        let mut tx = self.begin().await?;

        let cart = Self::lock_cart(&mut tx, cart_id)
            .await?
            .ok_or(CheckoutError::CartExpiredOrMissing(cart_id))?;
        Self::check_live(&cart, now)?;

        let removed: Option<i32> = sqlx::query_scalar(
            "DELETE FROM reservations WHERE cart_id = $1 AND sku_id = $2 RETURNING quantity",
        )
        .bind(cart_id.as_uuid())
        .bind(sku.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(quantity) = removed {
            Self::release_stock(&mut tx, sku, quantity).await?;
        }

        let view = Self::read_cart_view(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn get_cart(&self, cart_id: CartId, now: DateTime<Utc>) -> Result<CartView> {
        // Read-only: no locks taken, no expiry refresh.
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query("SELECT status, created_at, expires_at FROM carts WHERE id = $1")
            .bind(cart_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
        let cart = row
            .map(|row| Self::row_to_cart(cart_id, &row))
            .transpose()?
            .ok_or(CheckoutError::CartExpiredOrMissing(cart_id))?;
        Self::check_live(&cart, now)?;

        Self::read_cart_view(&mut conn, cart_id).await
    }

    async fn settle(
        &self,
        cart_id: CartId,
        payment_reference: &PaymentReference,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let mut tx = self.begin().await?;

        // Idempotent replay: a reference that already produced an order
        // returns it unchanged, even after the cart row is terminal.
        if let Some(order) = Self::load_order_by_reference(&mut tx, payment_reference).await? {
            tx.commit().await?;
            return Ok(order);
        }

        let Some(cart) = Self::lock_cart(&mut tx, cart_id).await? else {
            return Err(CheckoutError::CartExpiredOrMissing(cart_id));
        };
        match cart.status {
            CartStatus::Settled => {
                // A same-reference settlement may have committed between
                // the replay lookup above and the cart lock.
                return match Self::load_order_by_reference(&mut tx, payment_reference).await? {
                    Some(order) => {
                        tx.commit().await?;
                        Ok(order)
                    }
                    None => Err(CheckoutError::AlreadySettled(cart_id)),
                };
            }
            CartStatus::Reclaimed => return Err(CheckoutError::CartExpiredOrMissing(cart_id)),
            CartStatus::Active if cart.expires_at <= now => {
                return Err(CheckoutError::CartExpiredOrMissing(cart_id));
            }
            CartStatus::Active => {}
        }

        // Snapshot reservations with current prices into immutable lines.
        let rows = sqlx::query(
            r#"
            SELECT r.sku_id, r.quantity, s.unit_price_cents
            FROM reservations r
            JOIN skus s ON s.id = r.sku_id
            WHERE r.cart_id = $1
            ORDER BY r.sku_id
            "#,
        )
        .bind(cart_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        let lines = rows
            .into_iter()
            .map(|row| {
                Ok(OrderLine {
                    sku: SkuId::new(row.try_get::<String, _>("sku_id")?),
                    quantity: row.try_get::<i32, _>("quantity")? as u32,
                    unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                })
            })
            .collect::<Result<Vec<OrderLine>>>()?;

        let order_id = OrderId::new();
        let inserted = sqlx::query(
            "INSERT INTO orders (id, payment_reference, status, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(order_id.as_uuid())
        .bind(payment_reference.as_str())
        .bind(OrderStatus::Paid.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            // A concurrent settlement for a different cart won the unique
            // payment reference; roll back and return its order.
            if let sqlx::Error::Database(ref db_err) = err
                && db_err.constraint() == Some("unique_payment_reference")
            {
                drop(tx);
                if let Some(order) = self.find_order_by_reference(payment_reference).await? {
                    return Ok(order);
                }
            }
            return Err(CheckoutError::Database(err));
        }

        for line in &lines {
            sqlx::query(
                "INSERT INTO order_items (order_id, sku_id, quantity, unit_price_cents) VALUES ($1, $2, $3, $4)",
            )
            .bind(order_id.as_uuid())
            .bind(line.sku.as_str())
            .bind(line.quantity as i32)
            .bind(line.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        // The hold becomes the sale: reservations go away, the ledger's
        // decrement stays.
        sqlx::query("DELETE FROM reservations WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE carts SET status = 'settled' WHERE id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(%cart_id, %order_id, "cart settled");

        Ok(Order {
            id: order_id,
            payment_reference: payment_reference.clone(),
            status: OrderStatus::Paid,
            created_at: now,
            lines,
        })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;

        let row =
            sqlx::query("SELECT id, payment_reference, status, created_at FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let (id, payment_reference, status, created_at) = Self::row_to_order_header(&row)?;
        let lines = Self::load_order_lines(&mut conn, id).await?;
        Ok(Some(Order {
            id,
            payment_reference,
            status,
            created_at,
            lines,
        }))
    }

    async fn find_order_by_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_order_by_reference(&mut conn, payment_reference).await
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            "SELECT id, payment_reference, status, created_at FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Self::map_lock_error(e, "order"))?;
        let Some(row) = row else {
            return Err(CheckoutError::OrderNotFound(order_id));
        };
        let (id, payment_reference, current, created_at) = Self::row_to_order_header(&row)?;

        if !current.can_transition_to(status) {
            return Err(CheckoutError::InvalidStatusTransition {
                from: current,
                to: status,
            });
        }

        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        let lines = Self::load_order_lines(&mut tx, id).await?;
        tx.commit().await?;

        Ok(Order {
            id,
            payment_reference,
            status,
            created_at,
            lines,
        })
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CartId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM carts
            WHERE status = 'active' AND expires_at <= $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(CartId::from_uuid).collect())
    }

    async fn reclaim_cart(
        &self,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<Option<ReclaimedCart>> {
        let mut tx = self.begin().await?;

        // Takes the same cart lock settlement takes; whoever commits first
        // wins and the loser sees a terminal status. The lock_timeout
        // bounds the wait, surfacing pathological contention as a
        // retryable error for the next pass.
        let Some(cart) = Self::lock_cart(&mut tx, cart_id).await? else {
            return Ok(None);
        };

        // Re-verify under the lock: the candidate scan ran unlocked.
        if !cart.is_expired(now) {
            return Ok(None);
        }

        let rows =
            sqlx::query("SELECT sku_id, quantity FROM reservations WHERE cart_id = $1 ORDER BY sku_id")
                .bind(cart_id.as_uuid())
                .fetch_all(&mut *tx)
                .await?;

        let mut units_returned = 0u64;
        for row in rows {
            let sku = SkuId::new(row.try_get::<String, _>("sku_id")?);
            let quantity: i32 = row.try_get("quantity")?;
            Self::release_stock(&mut tx, &sku, quantity).await?;
            units_returned += quantity as u64;
        }

        sqlx::query("DELETE FROM reservations WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE carts SET status = 'reclaimed' WHERE id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(%cart_id, units_returned, "expired cart reclaimed");

        Ok(Some(ReclaimedCart {
            cart_id,
            units_returned,
        }))
    }
}
