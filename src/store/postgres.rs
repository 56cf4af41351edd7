//! Postgres-backed store.
//!
//! Multi-record mutations (order creation, cancellation) run in one
//! transaction. Payment transitions are version-guarded updates so two
//! concurrent reconcilers cannot both advance the same record.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    merge_items, Cart, CartItem, NewOrderItem, Order, OrderItem, OrderPaymentStatus, OrderStatus,
    OrderStatusEntry, Payment, PaymentStatus, Product, SettledPayment, ShippingAddress, User,
};
use crate::store::{OrderRepository, PaymentRepository, StoreError, UserRepository};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----- users -----

    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, phone) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(email)
        .bind(phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(d) if d.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(e),
        })
    }

    pub async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // ----- products -----

    pub async fn create_product(
        &self,
        seller_id: Uuid,
        name: &str,
        description: Option<&str>,
        price: i64,
        currency: &str,
        stock: i32,
    ) -> Result<Product, StoreError> {
        Ok(sqlx::query_as::<_, Product>(
            "INSERT INTO products (id, seller_id, name, description, price, currency, stock) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(seller_id)
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(currency)
        .bind(stock)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_products(&self, page: u32, per_page: u32) -> Result<(Vec<Product>, i64), StoreError> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE status = 'active' ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(per_page as i64)
        .bind(((page - 1) * per_page) as i64)
        .fetch_all(&self.pool)
        .await?;
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM products WHERE status = 'active'")
                .fetch_one(&self.pool)
                .await?;
        Ok((products, total.0))
    }

    pub async fn update_product(
        &self,
        id: Uuid,
        name: &str,
        description: Option<&str>,
        price: i64,
        stock: i32,
    ) -> Result<Product, StoreError> {
        sqlx::query_as::<_, Product>(
            "UPDATE products SET name = $2, description = $3, price = $4, stock = $5, updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(stock)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("product"))
    }

    // ----- carts -----

    pub async fn cart(&self, user_id: Uuid) -> Result<Cart, StoreError> {
        let cart = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cart.unwrap_or(Cart { user_id, items: Json(vec![]), updated_at: chrono::Utc::now() }))
    }

    pub async fn put_cart(&self, user_id: Uuid, items: Vec<CartItem>) -> Result<Cart, StoreError> {
        Ok(sqlx::query_as::<_, Cart>(
            "INSERT INTO carts (user_id, items, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET items = $2, updated_at = NOW() RETURNING *",
        )
        .bind(user_id)
        .bind(Json(items))
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn merge_cart(&self, user_id: Uuid, local: Vec<CartItem>) -> Result<Cart, StoreError> {
        let mut tx = self.pool.begin().await?;
        let server: Option<Cart> =
            sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let merged = merge_items(server.map(|c| c.items.0).unwrap_or_default(), local);
        let cart = sqlx::query_as::<_, Cart>(
            "INSERT INTO carts (user_id, items, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET items = $2, updated_at = NOW() RETURNING *",
        )
        .bind(user_id)
        .bind(Json(merged))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(cart)
    }

    pub async fn clear_cart(&self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ----- orders -----

    /// Checkout: the order row, its items, each product's stock decrement and
    /// each seller's balance credit land in one transaction or not at all.
    pub async fn create_order(
        &self,
        user_id: Uuid,
        items: &[NewOrderItem],
        shipping_address: &ShippingAddress,
        note: Option<&str>,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let order_id = Uuid::now_v7();
        let mut total: i64 = 0;
        let mut currency = String::from("KES");

        for item in items {
            let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
                .bind(item.product_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound("product"))?;
            if !product.has_stock(item.quantity) {
                return Err(StoreError::InsufficientStock(product.id));
            }
            let line_total = product.price * item.quantity as i64;
            total += line_total;
            currency = product.currency.clone();

            sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1")
                .bind(product.id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::now_v7())
            .bind(order_id)
            .bind(product.id)
            .bind(item.quantity)
            .bind(product.price)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO seller_balances (seller_id, total_earnings, total_units, current_balance, updated_at) \
                 VALUES ($1, $2, $3, $2, NOW()) \
                 ON CONFLICT (seller_id) DO UPDATE SET \
                 total_earnings = seller_balances.total_earnings + $2, \
                 total_units = seller_balances.total_units + $3, \
                 current_balance = seller_balances.current_balance + $2, \
                 updated_at = NOW()",
            )
            .bind(product.seller_id)
            .bind(line_total)
            .bind(item.quantity as i64)
            .execute(&mut *tx)
            .await?;
        }

        let order_number = format!("ORD-{:08}", rand::random::<u32>() % 100_000_000);
        let order = sqlx::query_as::<_, Order>(
            "INSERT INTO orders (id, order_number, user_id, total_amount, currency, shipping_address, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(order_id)
        .bind(&order_number)
        .bind(user_id)
        .bind(total)
        .bind(&currency)
        .bind(Json(shipping_address))
        .bind(note)
        .fetch_one(&mut *tx)
        .await?;
        append_history(&mut tx, order_id, OrderStatus::Pending, "order created", Some(user_id)).await?;

        tx.commit().await?;
        Ok(order)
    }

    pub async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        Ok(sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        Ok(sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn all_orders(&self, page: u32, per_page: u32) -> Result<(Vec<Order>, i64), StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(per_page as i64)
        .bind(((page - 1) * per_page) as i64)
        .fetch_all(&self.pool)
        .await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders").fetch_one(&self.pool).await?;
        Ok((orders, total.0))
    }

    pub async fn order_history(&self, order_id: Uuid) -> Result<Vec<OrderStatusEntry>, StoreError> {
        Ok(sqlx::query_as::<_, OrderStatusEntry>(
            "SELECT * FROM order_status_history WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Order-management status change; appends exactly one history entry.
    pub async fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        tracking_number: Option<&str>,
        note: &str,
        changed_by: Option<Uuid>,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("order"))?;
        order
            .check_status_change(status)
            .map_err(|e| StoreError::InvalidState(e.to_string()))?;

        let order = sqlx::query_as::<_, Order>(
            "UPDATE orders SET order_status = $2, tracking_number = COALESCE($3, tracking_number), \
             updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(tracking_number)
        .fetch_one(&mut *tx)
        .await?;
        append_history(&mut tx, id, status, note, changed_by).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Cancellation restores every line item's stock in the same transaction
    /// as the status change.
    pub async fn cancel_order(&self, id: Uuid, changed_by: Option<Uuid>) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("order"))?;
        order.check_cancellable().map_err(|e| StoreError::InvalidState(e.to_string()))?;

        let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        for item in &items {
            sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
                .bind(item.product_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?;
        }
        let order = sqlx::query_as::<_, Order>(
            "UPDATE orders SET order_status = 'cancelled', updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        append_history(&mut tx, id, OrderStatus::Cancelled, "order cancelled", changed_by).await?;
        tx.commit().await?;
        Ok(order)
    }
}

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
    status: OrderStatus,
    note: &str,
    changed_by: Option<Uuid>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_status_history (id, order_id, status, note, changed_by) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::now_v7())
    .bind(order_id)
    .bind(status)
    .bind(note)
    .bind(changed_by)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert(&self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (id, user_id, order_id, amount, currency, status, transaction_id, \
             reference, payment_method, customer_email, customer_phone, receipt_number, settled_at, \
             failure_reason, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(&payment.transaction_id)
        .bind(&payment.reference)
        .bind(payment.payment_method)
        .bind(&payment.customer_email)
        .bind(&payment.customer_phone)
        .bind(&payment.receipt_number)
        .bind(&payment.settled_at)
        .bind(&payment.failure_reason)
        .bind(payment.version)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Payment>, StoreError> {
        Ok(sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE transaction_id = $1 OR reference = $1",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        version: i32,
        reference: &str,
    ) -> Result<Payment, StoreError> {
        sqlx::query_as::<_, Payment>(
            "UPDATE payments SET status = 'processing', reference = $3, version = version + 1, \
             updated_at = NOW() WHERE id = $1 AND version = $2 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .bind(version)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Conflict)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        version: i32,
        settled: &SettledPayment,
    ) -> Result<Payment, StoreError> {
        let updated = sqlx::query_as::<_, Payment>(
            "UPDATE payments p SET status = 'completed', \
             transaction_id = COALESCE($3, p.transaction_id), \
             payment_method = COALESCE($4, p.payment_method), \
             receipt_number = COALESCE($5, p.receipt_number), \
             settled_at = COALESCE($6, p.settled_at), \
             customer_phone = COALESCE($7, p.customer_phone), \
             failure_reason = NULL, version = p.version + 1, updated_at = NOW() \
             WHERE p.id = $1 AND p.version = $2 AND p.status IN ('pending', 'processing') \
             AND NOT EXISTS (SELECT 1 FROM payments q WHERE q.order_id = p.order_id \
                             AND q.status = 'completed' AND q.id <> p.id) \
             RETURNING *",
        )
        .bind(id)
        .bind(version)
        .bind(&settled.canonical_transaction_id)
        .bind(settled.method)
        .bind(&settled.receipt.receipt_number)
        .bind(&settled.receipt.settled_at)
        .bind(&settled.receipt.payer_phone)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(payment) => Ok(payment),
            None => {
                let current = PaymentRepository::find(self, id).await?.ok_or(StoreError::NotFound("payment"))?;
                if current.status != PaymentStatus::Completed {
                    let other_completed: (i64,) = sqlx::query_as(
                        "SELECT COUNT(*) FROM payments WHERE order_id = $1 AND status = 'completed' AND id <> $2",
                    )
                    .bind(current.order_id)
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;
                    if other_completed.0 > 0 {
                        return Err(StoreError::DuplicateCompletion);
                    }
                }
                Err(StoreError::Conflict)
            }
        }
    }

    async fn mark_failed(&self, id: Uuid, version: i32, reason: &str) -> Result<Payment, StoreError> {
        sqlx::query_as::<_, Payment>(
            "UPDATE payments SET status = 'failed', failure_reason = $3, version = version + 1, \
             updated_at = NOW() WHERE id = $1 AND version = $2 AND status IN ('pending', 'processing') \
             RETURNING *",
        )
        .bind(id)
        .bind(version)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Conflict)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn find(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.order(id).await
    }

    async fn set_payment_status(
        &self,
        order_id: Uuid,
        status: OrderPaymentStatus,
    ) -> Result<bool, StoreError> {
        let query = if status == OrderPaymentStatus::Failed {
            "UPDATE orders SET payment_status = $2, updated_at = NOW() \
             WHERE id = $1 AND payment_status <> 'paid'"
        } else {
            "UPDATE orders SET payment_status = $2, updated_at = NOW() WHERE id = $1"
        };
        let result = sqlx::query(query).bind(order_id).bind(status).execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists.0)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.user(id).await
    }
}
