//! Postgres store against a throwaway container.
//!
//! Run with `cargo test -p market-payments --features postgres -- --ignored`
//! on a machine with Docker.

#![cfg(feature = "postgres")]

use rust_decimal_macros::dec;
use testcontainers_modules::{
    postgres::Postgres,
    testcontainers::{runners::AsyncRunner, ContainerAsync},
};

use market_payments::{
    CreatePaymentRequest, GatewayPayment, PaymentStatus, PaymentStore, PgPaymentStore, Plan,
    Prompt, PurchaseStatus, SubscriptionStatus, TransitionOutcome,
};

struct TestDb {
    store: PgPaymentStore,
    _container: ContainerAsync<Postgres>,
}

async fn setup() -> TestDb {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    let store = PgPaymentStore::connect(&url, 4).await.unwrap();
    insert_prompt(&store, &prompt()).await;

    TestDb {
        store,
        _container: container,
    }
}

// the crate has no catalog writes; seed it directly
async fn insert_prompt(store: &PgPaymentStore, prompt: &Prompt) {
    sqlx::query("INSERT INTO prompts (id, title, price) VALUES ($1, $2, $3)")
        .bind(&prompt.id)
        .bind(&prompt.title)
        .bind(prompt.price)
        .execute(store.pool())
        .await
        .unwrap();
}

fn prompt() -> Prompt {
    Prompt {
        id: "prompt-1".into(),
        title: "Release notes writer".into(),
        price: dec!(4.99),
    }
}

fn external(id: &str) -> GatewayPayment {
    GatewayPayment {
        payment_id: id.into(),
        payment_status: PaymentStatus::Waiting,
        pay_address: Some("bc1qexample".into()),
        price_amount: Some(dec!(4.99)),
        price_currency: Some("usd".into()),
        pay_amount: Some(dec!(0.00005123)),
        actually_paid: None,
        pay_currency: Some("btc".into()),
        order_id: None,
        order_description: None,
        created_at: None,
        updated_at: None,
    }
}

fn request(amount: rust_decimal::Decimal) -> CreatePaymentRequest {
    CreatePaymentRequest {
        price_amount: amount,
        price_currency: "usd".into(),
        pay_currency: "btc".into(),
        order_id: format!("order-{amount}"),
        order_description: "test".into(),
        ipn_callback_url: "http://localhost/payments/ipn".into(),
    }
}

#[tokio::test]
#[ignore = "needs Docker"]
async fn test_purchase_lifecycle() {
    let db = setup().await;
    let store = &db.store;

    let payment = store
        .create_purchase_payment(&external("P1"), &request(dec!(4.99)), "u1", &prompt())
        .await
        .unwrap();

    let record = store.find_payment_by_external_id("P1").await.unwrap().unwrap();
    assert_eq!(record.payment.id, payment.id);
    assert_eq!(record.payment.price_amount, dec!(4.99));
    assert_eq!(record.purchases[0].status, PurchaseStatus::Pending);
    assert!(!store.has_completed_purchase("u1", "prompt-1").await.unwrap());

    let first = store
        .apply_status_transition(&payment, &PaymentStatus::Finished)
        .await
        .unwrap();
    assert_eq!(
        first,
        TransitionOutcome::Applied {
            from: PaymentStatus::Waiting,
            to: PaymentStatus::Finished,
        }
    );
    let after_first = store.find_payment_by_external_id("P1").await.unwrap().unwrap();

    let second = store
        .apply_status_transition(&payment, &PaymentStatus::Finished)
        .await
        .unwrap();
    assert_eq!(second, TransitionOutcome::Unchanged);
    assert_eq!(
        store.find_payment_by_external_id("P1").await.unwrap().unwrap(),
        after_first
    );
    assert!(store.has_completed_purchase("u1", "prompt-1").await.unwrap());
}

#[tokio::test]
#[ignore = "needs Docker"]
async fn test_second_finished_payment_stays_mirrored() {
    let db = setup().await;
    let store = &db.store;

    let first = store
        .create_purchase_payment(&external("P1"), &request(dec!(4.99)), "u1", &prompt())
        .await
        .unwrap();
    let second = store
        .create_purchase_payment(&external("P2"), &request(dec!(4.99)), "u1", &prompt())
        .await
        .unwrap();

    store
        .apply_status_transition(&first, &PaymentStatus::Finished)
        .await
        .unwrap();
    store
        .apply_status_transition(&second, &PaymentStatus::Finished)
        .await
        .unwrap();

    let first = store.find_payment_by_external_id("P1").await.unwrap().unwrap();
    let second = store.find_payment_by_external_id("P2").await.unwrap().unwrap();
    assert_eq!(first.purchases[0].status, PurchaseStatus::Completed);
    assert_eq!(
        second.purchases[0].status,
        PurchaseStatus::Mirrored(PaymentStatus::Finished)
    );
    assert_eq!(second.payment.payment_status, PaymentStatus::Finished);
}

#[tokio::test]
#[ignore = "needs Docker"]
async fn test_unrecognized_status_round_trips() {
    let db = setup().await;
    let store = &db.store;

    let payment = store
        .create_purchase_payment(&external("P1"), &request(dec!(4.99)), "u1", &prompt())
        .await
        .unwrap();
    store
        .apply_status_transition(&payment, &PaymentStatus::Unknown("completed".into()))
        .await
        .unwrap();

    let record = store.find_payment_by_external_id("P1").await.unwrap().unwrap();
    assert_eq!(
        record.payment.payment_status,
        PaymentStatus::Unknown("completed".into())
    );
    assert_ne!(record.purchases[0].status, PurchaseStatus::Completed);
    assert!(!store.has_completed_purchase("u1", "prompt-1").await.unwrap());
}

#[tokio::test]
#[ignore = "needs Docker"]
async fn test_concurrent_identical_transitions_apply_once() {
    let db = setup().await;
    let store = &db.store;

    let payment = store
        .create_subscription_payment(&external("P1"), &request(dec!(9.99)), "u1", Plan::Monthly)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        store.apply_status_transition(&payment, &PaymentStatus::Finished),
        store.apply_status_transition(&payment, &PaymentStatus::Finished),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);
    assert!(outcomes.contains(&TransitionOutcome::Unchanged));

    let record = store.find_payment_by_external_id("P1").await.unwrap().unwrap();
    assert_eq!(record.subscriptions[0].status, SubscriptionStatus::Active);
}

#[tokio::test]
#[ignore = "needs Docker"]
async fn test_subscription_activation_and_cancel() {
    let db = setup().await;
    let store = &db.store;

    let payment = store
        .create_subscription_payment(&external("P1"), &request(dec!(99.99)), "u1", Plan::Yearly)
        .await
        .unwrap();
    store
        .apply_status_transition(&payment, &PaymentStatus::Finished)
        .await
        .unwrap();

    let subscriptions = store.subscriptions_for_user("u1").await.unwrap();
    assert_eq!(subscriptions.len(), 1);
    let active = &subscriptions[0];
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(active.current_period_end.is_some());

    assert!(store.cancel_subscription("u2", active.id).await.unwrap().is_none());

    let cancelled = store.cancel_subscription("u1", active.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let again = store.cancel_subscription("u1", active.id).await.unwrap().unwrap();
    assert_eq!(again.cancelled_at, cancelled.cancelled_at);
    assert_eq!(again.updated_at, cancelled.updated_at);
}
