//! Checkout engine invariants under concurrency and arbitrary histories.
//!
//! - Racing customers for the last units never oversell
//! - Random interleavings of placements, payments, failures and expiries
//!   keep the stock counters consistent and settle each order at most once
//!
//! Run with: `cargo test -p farmstand-shop --test checkout_engine`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::StatusCode;
use common::TestShop;
use farmstand_auth::UserId;
use farmstand_core::reducer::Reducer;
use farmstand_shop::checkout::{CheckoutAction, CheckoutEnvironment, CheckoutReducer};
use farmstand_shop::notifications::RecordingMailer;
use farmstand_shop::payments::MockPaymentGateway;
use farmstand_shop::persistence::InMemoryCheckoutRepository;
use farmstand_shop::types::{
    CheckoutState, CustomerContact, Money, OrderId, OrderStatus, PaymentIntentId, Product,
};
use farmstand_testing::test_clock;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Racing customers
// ============================================================================

#[tokio::test]
async fn test_two_customers_racing_for_the_last_units() {
    let shop = TestShop::start().await;
    let honey = shop.list_product("Wildflower Honey", 1200, 5).await;
    let (_, ada) = shop.sign_in("sub-ada", "ada@example.com").await;
    let (_, bob) = shop.sign_in("sub-bob", "bob@example.com").await;

    let (first, second) = tokio::join!(
        shop.place_order(&ada, honey, 3),
        shop.place_order(&bob, honey, 3)
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    let loser = if first.0 == StatusCode::CONFLICT { first.1 } else { second.1 };
    assert_eq!(loser["code"], "OUT_OF_STOCK");
    assert_eq!(loser["message"], "only 2 left in stock, 3 requested");

    let product = shop.product(honey).await;
    assert_eq!((product.inventory, product.reserved), (5, 3));
}

#[tokio::test]
async fn test_many_concurrent_orders_never_oversell() {
    let shop = TestShop::start().await;
    let eggs = shop.list_product("Farm Fresh Eggs", 600, 7).await;

    let mut tokens = Vec::new();
    for n in 0..20 {
        let (_, token) = shop.sign_in(&format!("sub-{n}"), &format!("c{n}@example.com")).await;
        tokens.push(token);
    }

    let results = futures::future::join_all(tokens.iter().map(|t| shop.place_order(t, eggs, 1))).await;

    let created = results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    let conflicts = results.iter().filter(|(s, _)| *s == StatusCode::CONFLICT).count();
    assert_eq!(created, 7);
    assert_eq!(conflicts, 13);

    let product = shop.product(eggs).await;
    assert_eq!(product.reserved, 7);
    assert_eq!(product.available(), 0);
}

// ============================================================================
// Arbitrary histories
// ============================================================================

#[derive(Clone, Debug)]
enum Step {
    Place { product: usize, quantity: u32 },
    IntentCreated { order: usize },
    Succeed { order: usize },
    Fail { order: usize },
    Expire { order: usize },
    Restock { product: usize, quantity: u32 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..2usize, 0..6u32).prop_map(|(product, quantity)| Step::Place { product, quantity }),
        3 => (0..12usize).prop_map(|order| Step::IntentCreated { order }),
        3 => (0..12usize).prop_map(|order| Step::Succeed { order }),
        1 => (0..12usize).prop_map(|order| Step::Fail { order }),
        1 => (0..12usize).prop_map(|order| Step::Expire { order }),
        1 => (0..2usize, 1..4u32).prop_map(|(product, quantity)| Step::Restock { product, quantity }),
    ]
}

fn environment() -> CheckoutEnvironment {
    CheckoutEnvironment::new(
        Arc::new(test_clock()),
        Arc::new(MockPaymentGateway::new()),
        Arc::new(InMemoryCheckoutRepository::new()),
        Arc::new(RecordingMailer::new()),
    )
}

fn contact() -> CustomerContact {
    CustomerContact {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        phone: None,
        shipping_address: None,
    }
}

fn intent_for(order_id: OrderId) -> PaymentIntentId {
    PaymentIntentId::new(format!("pi_{}", order_id.as_uuid().simple()))
}

proptest! {
    #[test]
    fn stock_counters_stay_consistent(steps in proptest::collection::vec(step(), 1..60)) {
        let reducer = CheckoutReducer::new();
        let env = environment();
        let mut state = CheckoutState::new();

        let products: Vec<Product> = vec![
            Product::new("Eggs", "", Money::from_cents(600), 6),
            Product::new("Honey", "", Money::from_cents(1200), 3),
        ];
        for product in &products {
            let _ = reducer.reduce(&mut state, CheckoutAction::ProductListed { product: product.clone() }, &env);
        }

        let mut placed: Vec<OrderId> = Vec::new();
        let mut settled: HashMap<OrderId, OrderStatus> = HashMap::new();
        let mut committed: HashMap<usize, u32> = HashMap::new();
        let mut restocked: HashMap<usize, u32> = HashMap::new();

        for step in steps {
            let action = match step {
                Step::Place { product, quantity } => {
                    let order_id = OrderId::new();
                    placed.push(order_id);
                    CheckoutAction::PlaceOrder {
                        order_id,
                        user_id: UserId::new(),
                        product_id: products[product].id,
                        quantity,
                        contact: contact(),
                        customer: None,
                    }
                },
                Step::IntentCreated { order } => {
                    let Some(&order_id) = placed.get(order) else { continue };
                    CheckoutAction::PaymentIntentCreated {
                        order_id,
                        payment_intent_id: intent_for(order_id),
                        client_secret: "secret".to_string(),
                    }
                },
                Step::Succeed { order } => {
                    let Some(&order_id) = placed.get(order) else { continue };
                    CheckoutAction::PaymentSucceeded { payment_intent_id: intent_for(order_id) }
                },
                Step::Fail { order } => {
                    let Some(&order_id) = placed.get(order) else { continue };
                    CheckoutAction::PaymentFailed {
                        payment_intent_id: intent_for(order_id),
                        reason: "declined".to_string(),
                    }
                },
                Step::Expire { order } => {
                    let Some(&order_id) = placed.get(order) else { continue };
                    CheckoutAction::ReservationExpired { order_id }
                },
                Step::Restock { product, quantity } => {
                    *restocked.entry(product).or_default() += quantity;
                    CheckoutAction::ProductRestocked { product_id: products[product].id, quantity }
                },
            };

            let _ = reducer.reduce(&mut state, action, &env);

            // Settled orders never change status again
            for order in state.orders.values() {
                if order.status.is_terminal() {
                    let first = settled.entry(order.id).or_insert_with(|| {
                        if order.status == OrderStatus::Completed {
                            let index = products.iter().position(|p| p.id == order.product_id).unwrap();
                            *committed.entry(index).or_default() += order.quantity;
                        }
                        order.status
                    });
                    prop_assert_eq!(*first, order.status);
                }
                prop_assert_eq!(order.total.cents(), u64::from(order.quantity) * order.unit_price.cents());
                prop_assert!(order.quantity > 0);
            }

            prop_assert!(state.inventory_is_consistent());
            for (index, original) in products.iter().enumerate() {
                let product = state.product(&original.id).unwrap();
                let pending: u32 = state
                    .orders
                    .values()
                    .filter(|o| o.product_id == original.id && o.is_pending())
                    .map(|o| o.quantity)
                    .sum();
                prop_assert_eq!(product.reserved, pending);
                prop_assert_eq!(
                    product.inventory,
                    original.inventory + restocked.get(&index).copied().unwrap_or(0)
                        - committed.get(&index).copied().unwrap_or(0)
                );
            }
        }
    }
}
