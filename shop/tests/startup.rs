//! Startup behavior: catalog seeding and recovery of persisted orders.
//!
//! Run with: `cargo test -p farmstand-shop --test startup`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::StatusCode;
use common::{TestShop, test_config, test_config_with};
use farmstand_auth::UserId;
use farmstand_shop::payments::MockPaymentGateway;
use farmstand_shop::persistence::{CheckoutRepository, InMemoryCheckoutRepository};
use farmstand_shop::types::{CustomerContact, Money, Order, OrderId, OrderStatus, PaymentIntentId, Product};
use farmstand_testing::test_epoch;
use std::sync::Arc;
use std::time::Duration;

fn pending_order(product: &Product, quantity: u32, expires_in: chrono::Duration) -> Order {
    let placed_at = test_epoch() - chrono::Duration::minutes(30);
    Order {
        id: OrderId::new(),
        user_id: UserId::new(),
        product_id: product.id,
        quantity,
        unit_price: product.unit_price,
        total: product.unit_price.checked_multiply(quantity).unwrap(),
        status: OrderStatus::Pending,
        failure_reason: None,
        payment_intent_id: None,
        client_secret: None,
        contact: CustomerContact {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
            shipping_address: None,
        },
        created_at: placed_at,
        updated_at: placed_at,
        reservation_expires_at: test_epoch() + expires_in,
        completed_at: None,
        confirmation_sent_at: None,
        refund_requested_at: None,
        refund_id: None,
        version: 1,
    }
}

#[tokio::test]
async fn test_empty_catalog_is_seeded_once() {
    let repository = Arc::new(InMemoryCheckoutRepository::new());
    let config = test_config_with(&[("CATALOG_SEED_PATH", "seed/products.json")]);

    let shop = TestShop::start_with(repository.clone(), config.clone()).await;
    let (status, body) = shop.get("/api/products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["products"].as_array().unwrap().len(), 5);
    shop.settle().await;

    // Restart over the same storage
    let eggs = body["products"][0]["id"].as_str().unwrap().to_string();
    let restarted = TestShop::start_with(repository.clone(), config).await;
    let (_, body) = restarted.get("/api/products", None).await;
    assert_eq!(body["products"].as_array().unwrap().len(), 5);
    assert_eq!(body["products"][0]["id"], eggs);
}

#[tokio::test]
async fn test_missing_seed_file_fails_startup() {
    let config = test_config_with(&[("CATALOG_SEED_PATH", "seed/does-not-exist.json")]);
    let resources = farmstand_shop::app::Resources::in_memory(
        Arc::new(farmstand_testing::test_clock()),
        Arc::new(farmstand_shop::payments::MockPaymentGateway::new()),
        Arc::new(farmstand_shop::notifications::RecordingMailer::new()),
        Arc::new(farmstand_auth::providers::GoogleOAuthProvider::new(
            "id".to_string(),
            "secret".to_string(),
        )),
    );

    let err = farmstand_shop::app::build_state(&config, resources).await.err().unwrap();
    assert!(err.to_string().contains("failed to seed catalog"));
}

#[tokio::test]
async fn test_lapsed_reservations_are_released_after_restart() {
    let repository = Arc::new(InMemoryCheckoutRepository::new());

    let mut honey = Product::new("Wildflower Honey", "", Money::from_cents(1200), 10);
    honey.reserved = 5;
    let lapsed = pending_order(&honey, 2, -chrono::Duration::minutes(1));
    let live = pending_order(&honey, 3, chrono::Duration::minutes(20));
    repository.save_order(&lapsed, &honey).await.unwrap();
    repository.save_order(&live, &honey).await.unwrap();

    let shop = TestShop::start_with(repository.clone(), test_config()).await;

    // The lapsed order's timer fires immediately
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = shop
                .state
                .store
                .state(|s| s.order(&lapsed.id).map(|o| o.status))
                .await;
            if status == Some(OrderStatus::Failed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lapsed reservation was not released");
    shop.settle().await;

    let product = shop.product(honey.id).await;
    assert_eq!((product.inventory, product.reserved), (10, 3));

    let live_now = shop.state.store.state(|s| s.order(&live.id).cloned()).await.unwrap();
    assert_eq!(live_now.status, OrderStatus::Pending);

    let stored = repository.order(lapsed.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("reservation expired"));
}

#[tokio::test]
async fn test_order_paid_before_crash_is_refunded_after_restart() {
    let repository = Arc::new(InMemoryCheckoutRepository::new());

    // The success notification was acknowledged but the completed order
    // never reached storage, so the snapshot still holds it as pending.
    let mut jam = Product::new("Strawberry Jam", "", Money::from_cents(700), 6);
    jam.reserved = 2;
    let mut stale = pending_order(&jam, 2, -chrono::Duration::minutes(1));
    let intent = PaymentIntentId::new("pi_paid_before_crash");
    stale.payment_intent_id = Some(intent.clone());
    stale.client_secret = Some("pi_paid_before_crash_secret".to_string());
    repository.save_order(&stale, &jam).await.unwrap();

    let gateway = MockPaymentGateway::new();
    gateway.capture(&intent);
    let shop = TestShop::start_with_gateway(repository.clone(), test_config(), gateway).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if shop.gateway.refund_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("paid order was not refunded");
    shop.settle().await;

    assert_eq!(shop.gateway.cancel_count(), 1);
    assert_eq!(shop.gateway.refund_count(), 1);
    assert!(shop.mailer.sent().is_empty());

    let product = shop.product(jam.id).await;
    assert_eq!((product.inventory, product.reserved), (6, 0));

    let stored = repository.order(stale.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);
    assert!(stored.refund_requested_at.is_some());
    assert!(stored.refund_id.is_some());
}
