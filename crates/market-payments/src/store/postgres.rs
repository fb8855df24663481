//! Postgres payment store
//!
//! Status transitions lock the payment row with `SELECT ... FOR UPDATE`
//! before comparing statuses, so concurrent IPNs for one payment serialize
//! on that row and the last commit wins.
//!
//! A partial unique index keeps one completed purchase per user and prompt.
//! If two different payments for the same prompt finish at the same moment,
//! the later commit fails on that index and the IPN is answered with a 500;
//! the gateway's retry then finds the completed row and mirrors `finished`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{new_payment, PaymentStore};
use crate::error::{PaymentError, Result};
use crate::gateway::{CreatePaymentRequest, GatewayPayment};
use crate::model::{
    Payment, PaymentRecord, PaymentStatus, Plan, Prompt, Purchase, PurchaseStatus, Subscription,
    SubscriptionStatus,
};
use crate::transition::{apply_to_purchase, apply_to_subscription, TransitionOutcome};

const PAYMENT_COLUMNS: &str = "id, payment_id, payment_status, price_amount, price_currency, \
     pay_currency, pay_amount, pay_address, order_id, created_at, updated_at";
const PURCHASE_COLUMNS: &str =
    "id, user_id, prompt_id, price, status, payment_id, purchased_at, updated_at";
const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, payment_id, current_period_end, \
     cancelled_at, created_at, updated_at";

/// Postgres-backed payment store
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run the bundled migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| PaymentError::Storage(format!("migrations failed: {e}")))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_payment(tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO payments
               (id, payment_id, payment_status, price_amount, price_currency, pay_currency,
                pay_amount, pay_address, order_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(payment.id)
        .bind(&payment.payment_id)
        .bind(payment.payment_status.as_str())
        .bind(payment.price_amount)
        .bind(&payment.price_currency)
        .bind(&payment.pay_currency)
        .bind(payment.pay_amount)
        .bind(&payment.pay_address)
        .bind(&payment.order_id)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Whether the purchase's user completed the same prompt through another row
    async fn owns_elsewhere(tx: &mut Transaction<'_, Postgres>, purchase: &Purchase) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT EXISTS (
                   SELECT 1 FROM purchases
                   WHERE user_id = $1 AND prompt_id = $2 AND status = 'completed' AND id <> $3
               ) AS owned"#,
        )
        .bind(&purchase.user_id)
        .bind(&purchase.prompt_id)
        .bind(purchase.id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.try_get("owned")?)
    }

    async fn load_children(
        executor: &mut sqlx::PgConnection,
        payment_id: Uuid,
    ) -> Result<(Vec<Purchase>, Vec<Subscription>)> {
        let purchases = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE payment_id = $1 ORDER BY purchased_at"
        ))
        .bind(payment_id)
        .fetch_all(&mut *executor)
        .await?
        .iter()
        .map(purchase_from_row)
        .collect::<Result<Vec<_>>>()?;

        let subscriptions = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE payment_id = $1 ORDER BY created_at"
        ))
        .bind(payment_id)
        .fetch_all(&mut *executor)
        .await?
        .iter()
        .map(subscription_from_row)
        .collect::<Result<Vec<_>>>()?;

        Ok((purchases, subscriptions))
    }
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status: String = row.try_get("payment_status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        payment_id: row.try_get("payment_id")?,
        payment_status: PaymentStatus::parse(&status),
        price_amount: row.try_get("price_amount")?,
        price_currency: row.try_get("price_currency")?,
        pay_currency: row.try_get("pay_currency")?,
        pay_amount: row.try_get("pay_amount")?,
        pay_address: row.try_get("pay_address")?,
        order_id: row.try_get("order_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<Purchase> {
    let status: String = row.try_get("status")?;
    Ok(Purchase {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        prompt_id: row.try_get("prompt_id")?,
        price: row.try_get("price")?,
        status: PurchaseStatus::parse(&status),
        payment_id: row.try_get("payment_id")?,
        purchased_at: row.try_get("purchased_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let plan: String = row.try_get("plan")?;
    let status: String = row.try_get("status")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan: Plan::parse(&plan)
            .map_err(|_| PaymentError::Storage(format!("unknown plan '{plan}' in subscriptions")))?,
        status: SubscriptionStatus::parse(&status)?,
        payment_id: row.try_get("payment_id")?,
        current_period_end: row.try_get("current_period_end")?,
        cancelled_at: row.try_get("cancelled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn find_prompt(&self, prompt_id: &str) -> Result<Option<Prompt>> {
        let row = sqlx::query("SELECT id, title, price FROM prompts WHERE id = $1")
            .bind(prompt_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<Prompt> {
            Ok(Prompt {
                id: r.try_get("id")?,
                title: r.try_get("title")?,
                price: r.try_get("price")?,
            })
        })
        .transpose()
    }

    async fn has_completed_purchase(&self, user_id: &str, prompt_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT EXISTS (
                   SELECT 1 FROM purchases
                   WHERE user_id = $1 AND prompt_id = $2 AND status = 'completed'
               ) AS owned"#,
        )
        .bind(user_id)
        .bind(prompt_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("owned")?)
    }

    async fn create_purchase_payment(
        &self,
        external: &GatewayPayment,
        request: &CreatePaymentRequest,
        user_id: &str,
        prompt: &Prompt,
    ) -> Result<Payment> {
        let now = Utc::now();
        let payment = new_payment(external, request, now);

        let mut tx = self.pool.begin().await?;
        Self::insert_payment(&mut tx, &payment).await?;
        sqlx::query(
            r#"INSERT INTO purchases
               (id, user_id, prompt_id, price, status, payment_id, purchased_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&prompt.id)
        .bind(prompt.price)
        .bind(PurchaseStatus::Pending.as_str())
        .bind(payment.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(payment)
    }

    async fn create_subscription_payment(
        &self,
        external: &GatewayPayment,
        request: &CreatePaymentRequest,
        user_id: &str,
        plan: Plan,
    ) -> Result<Payment> {
        let now = Utc::now();
        let payment = new_payment(external, request, now);

        let mut tx = self.pool.begin().await?;
        Self::insert_payment(&mut tx, &payment).await?;
        sqlx::query(
            r#"INSERT INTO subscriptions
               (id, user_id, plan, status, payment_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $6)"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan.as_str())
        .bind(SubscriptionStatus::Pending.as_str())
        .bind(payment.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(payment)
    }

    async fn find_payment_by_external_id(&self, payment_id: &str) -> Result<Option<PaymentRecord>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payment = payment_from_row(&row)?;
        let (purchases, subscriptions) = Self::load_children(&mut *conn, payment.id).await?;

        Ok(Some(PaymentRecord {
            payment,
            purchases,
            subscriptions,
        }))
    }

    async fn apply_status_transition(
        &self,
        payment: &Payment,
        status: &PaymentStatus,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT payment_status FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment.id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(PaymentError::NotFound(format!("payment {}", payment.payment_id)));
        };
        let current = PaymentStatus::parse(&row.try_get::<String, _>("payment_status")?);
        if current == *status {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Unchanged);
        }

        let now: DateTime<Utc> = Utc::now();
        sqlx::query("UPDATE payments SET payment_status = $1, updated_at = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(now)
            .bind(payment.id)
            .execute(&mut *tx)
            .await?;

        let (mut purchases, mut subscriptions) = Self::load_children(&mut *tx, payment.id).await?;

        for purchase in &mut purchases {
            let already_owned = *status == PaymentStatus::Finished
                && Self::owns_elsewhere(&mut tx, purchase).await?;
            apply_to_purchase(purchase, status, already_owned, now);
            sqlx::query("UPDATE purchases SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(purchase.status.as_str())
                .bind(purchase.updated_at)
                .bind(purchase.id)
                .execute(&mut *tx)
                .await?;
        }

        for subscription in &mut subscriptions {
            if !apply_to_subscription(subscription, status, now) {
                continue;
            }
            sqlx::query(
                r#"UPDATE subscriptions
                   SET status = $1, current_period_end = $2, cancelled_at = $3, updated_at = $4
                   WHERE id = $5"#,
            )
            .bind(subscription.status.as_str())
            .bind(subscription.current_period_end)
            .bind(subscription.cancelled_at)
            .bind(subscription.updated_at)
            .bind(subscription.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(TransitionOutcome::Applied {
            from: current,
            to: status.clone(),
        })
    }

    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(subscription_from_row)
        .collect()
    }

    async fn cancel_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            r#"UPDATE subscriptions
               SET status = 'cancelled',
                   cancelled_at = COALESCE(cancelled_at, NOW()),
                   updated_at = CASE WHEN status = 'cancelled' THEN updated_at ELSE NOW() END
               WHERE id = $1 AND user_id = $2
               RETURNING {SUBSCRIPTION_COLUMNS}"#
        ))
        .bind(subscription_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(subscription_from_row).transpose()
    }
}
