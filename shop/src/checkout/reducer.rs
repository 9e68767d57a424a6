//! Checkout reducer: the order/payment state machine.
//!
//! Stock uses two-phase accounting:
//! 1. `PlaceOrder` reserves `quantity` units (`reserved += quantity`)
//! 2. `PaymentSucceeded` commits them (`inventory -= quantity`, `reserved -= quantity`)
//! 3. Failure or expiry releases them (`reserved -= quantity`)
//!
//! Every transition runs under the store's write lock, so the check of an
//! order's status and the change to its product's counters happen as one
//! step. Orders leave `Pending` exactly once; later deliveries of the same
//! notification find a terminal order and do nothing.
//!
//! A payment that succeeds after its order already failed (the reservation
//! expired while the customer was paying) is never revived. The payment is
//! refunded instead, once.

use super::actions::{CheckoutAction, RejectReason};
use super::environment::CheckoutEnvironment;
use crate::notifications::OrderConfirmation;
use crate::payments::{PaymentGatewayError, PaymentIntentRequest, PaymentIntentStatus};
use crate::types::{
    CheckoutState, Money, Order, OrderId, OrderStatus, PaymentIntentId, Product, ProductId,
};
use farmstand_core::{SmallVec, async_effect, delay, effect::Effect, reducer::Reducer, smallvec};
use farmstand_runtime::metrics::{CheckoutMetrics, NotificationMetrics};
use farmstand_runtime::retry::{retry_or_dead_letter, retry_with_predicate};
use std::sync::Arc;
use std::time::Duration;

type Effects = SmallVec<[Effect<CheckoutAction>; 4]>;

/// Reducer for the checkout engine
#[derive(Clone, Debug, Default)]
pub struct CheckoutReducer;

impl CheckoutReducer {
    /// Creates a new `CheckoutReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    // ========== Validation ==========

    fn validate_placement(
        state: &CheckoutState,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(Product, Money), RejectReason> {
        if quantity == 0 {
            return Err(RejectReason::InvalidQuantity);
        }

        let product = state
            .product(product_id)
            .ok_or(RejectReason::UnknownProduct)?;

        let available = product.available();
        if quantity > available {
            return Err(RejectReason::OutOfStock {
                requested: quantity,
                available,
            });
        }

        let total = product
            .unit_price
            .checked_multiply(quantity)
            .ok_or(RejectReason::InvalidQuantity)?;

        Ok((product.clone(), total))
    }

    // ========== State changes ==========

    /// Apply an event to state.
    ///
    /// Only `OrderPlaced` changes state this way; the other transitions
    /// need the environment and are handled in `reduce`.
    fn apply_event(state: &mut CheckoutState, action: &CheckoutAction) {
        if let CheckoutAction::OrderPlaced { order } = action {
            if state.orders.contains_key(&order.id) {
                return;
            }
            if let Some(product) = state.products.get_mut(&order.product_id) {
                product.reserved += order.quantity;
                product.version += 1;
            }
            state.orders.insert(order.id, order.clone());
        }
    }

    /// Move a pending order to `Failed` and release its stock.
    ///
    /// Returns the updated order and product, or `None` if the order is
    /// unknown or no longer pending.
    fn fail_order(
        state: &mut CheckoutState,
        order_id: OrderId,
        reason: String,
        env: &CheckoutEnvironment,
    ) -> Option<(Order, Product)> {
        let order = state.orders.get_mut(&order_id)?;
        if !order.is_pending() {
            return None;
        }
        let product = state.products.get_mut(&order.product_id)?;

        product.reserved = product.reserved.saturating_sub(order.quantity);
        product.version += 1;

        order.status = OrderStatus::Failed;
        order.failure_reason = Some(reason);
        order.touch(env.clock.now());

        Some((order.clone(), product.clone()))
    }

    /// Move a pending order to `Completed` and commit its stock.
    fn complete_order(
        state: &mut CheckoutState,
        order_id: OrderId,
        env: &CheckoutEnvironment,
    ) -> Option<(Order, Product)> {
        let order = state.orders.get_mut(&order_id)?;
        if !order.is_pending() {
            return None;
        }
        let product = state.products.get_mut(&order.product_id)?;

        product.inventory = product.inventory.saturating_sub(order.quantity);
        product.reserved = product.reserved.saturating_sub(order.quantity);
        product.version += 1;

        let now = env.clock.now();
        order.status = OrderStatus::Completed;
        order.completed_at = Some(now);
        order.touch(now);

        Some((order.clone(), product.clone()))
    }

    fn order_and_product(state: &CheckoutState, order_id: OrderId) -> Option<(Order, Product)> {
        let order = state.order(&order_id)?;
        let product = state.product(&order.product_id)?;
        Some((order.clone(), product.clone()))
    }

    // ========== Effects ==========

    fn persist_order(env: &CheckoutEnvironment, order: Order, product: Product) -> Effect<CheckoutAction> {
        let repository = Arc::clone(&env.repository);
        let dlq = env.dead_letters.clone();
        let policy = env.settings.retry.clone();

        async_effect! {
            let result = retry_or_dead_letter(policy, &dlq, format!("save_order:{}", order.id), || {
                let repository = Arc::clone(&repository);
                let (order, product) = (order.clone(), product.clone());
                async move { repository.save_order(&order, &product).await }
            })
            .await;

            if let Err(error) = result {
                tracing::error!(order_id = %order.id, error = %error, "Failed to persist order");
            }
            None
        }
    }

    fn persist_product(env: &CheckoutEnvironment, product: Product) -> Effect<CheckoutAction> {
        let repository = Arc::clone(&env.repository);
        let dlq = env.dead_letters.clone();
        let policy = env.settings.retry.clone();

        async_effect! {
            let result = retry_or_dead_letter(policy, &dlq, format!("save_product:{}", product.id), || {
                let repository = Arc::clone(&repository);
                let product = product.clone();
                async move { repository.save_product(&product).await }
            })
            .await;

            if let Err(error) = result {
                tracing::error!(product_id = %product.id, error = %error, "Failed to persist product");
            }
            None
        }
    }

    fn create_payment_intent(env: &CheckoutEnvironment, request: PaymentIntentRequest) -> Effect<CheckoutAction> {
        let gateway = Arc::clone(&env.gateway);
        let policy = env.settings.retry.clone();

        async_effect! {
            let order_id = request.order_id;
            let result = retry_with_predicate(
                policy,
                || {
                    let gateway = Arc::clone(&gateway);
                    let request = request.clone();
                    async move { gateway.create_payment_intent(&request).await }
                },
                PaymentGatewayError::is_transient,
            )
            .await;

            Some(match result {
                Ok(intent) => CheckoutAction::PaymentIntentCreated {
                    order_id,
                    payment_intent_id: intent.id,
                    client_secret: intent.client_secret,
                },
                Err(error) => CheckoutAction::PaymentIntentFailed {
                    order_id,
                    reason: error.to_string(),
                },
            })
        }
    }

    fn cancel_payment_intent(env: &CheckoutEnvironment, intent: PaymentIntentId) -> Effect<CheckoutAction> {
        let gateway = Arc::clone(&env.gateway);
        let policy = env.settings.retry.clone();

        async_effect! {
            let result = retry_with_predicate(
                policy,
                || {
                    let gateway = Arc::clone(&gateway);
                    let intent = intent.clone();
                    async move { gateway.cancel_payment_intent(&intent).await }
                },
                PaymentGatewayError::is_transient,
            )
            .await;

            let Err(error) = result else {
                return None;
            };
            tracing::warn!(payment_intent_id = %intent, error = %error, "Failed to cancel payment intent");

            // A cancel is refused once the customer has paid. Route the capture
            // through the late-success path so the failed order gets refunded.
            match gateway.payment_intent_status(&intent).await {
                Ok(PaymentIntentStatus::Succeeded) => {
                    tracing::warn!(payment_intent_id = %intent, "Intent was paid before it could be cancelled");
                    Some(CheckoutAction::PaymentSucceeded { payment_intent_id: intent })
                },
                Ok(_) => None,
                Err(error) => {
                    tracing::error!(payment_intent_id = %intent, error = %error, "Could not check intent status after failed cancel");
                    None
                },
            }
        }
    }

    fn refund(env: &CheckoutEnvironment, order_id: OrderId, intent: PaymentIntentId) -> Effect<CheckoutAction> {
        let gateway = Arc::clone(&env.gateway);
        let dlq = env.dead_letters.clone();
        let policy = env.settings.retry.clone();

        async_effect! {
            let result = retry_or_dead_letter(policy, &dlq, format!("refund:{intent}"), || {
                let gateway = Arc::clone(&gateway);
                let intent = intent.clone();
                async move { gateway.refund(&intent).await }
            })
            .await;

            Some(match result {
                Ok(refund_id) => CheckoutAction::RefundIssued { order_id, refund_id },
                Err(error) => CheckoutAction::RefundFailed {
                    order_id,
                    error: error.to_string(),
                },
            })
        }
    }

    fn send_confirmation(env: &CheckoutEnvironment, confirmation: OrderConfirmation) -> Effect<CheckoutAction> {
        let mailer = Arc::clone(&env.mailer);
        let dlq = env.dead_letters.clone();
        let policy = env.settings.retry.clone();

        async_effect! {
            let order_id = confirmation.order_id;
            let result = retry_or_dead_letter(policy, &dlq, format!("send_confirmation:{order_id}"), || {
                let mailer = Arc::clone(&mailer);
                let confirmation = confirmation.clone();
                async move { mailer.send_order_confirmation(&confirmation).await }
            })
            .await;

            Some(match result {
                Ok(()) => {
                    NotificationMetrics::record_sent();
                    CheckoutAction::ConfirmationSent { order_id }
                },
                Err(error) => {
                    NotificationMetrics::record_failed();
                    CheckoutAction::ConfirmationFailed {
                        order_id,
                        error: error.to_string(),
                    }
                },
            })
        }
    }

    fn reject(order_id: OrderId, reason: RejectReason) -> Effects {
        CheckoutMetrics::record_rejected(reason.label());
        smallvec![async_effect! {
            Some(CheckoutAction::OrderRejected { order_id, reason })
        }]
    }

    fn reservation_timer(order_id: OrderId, remaining: Duration) -> Effect<CheckoutAction> {
        delay! {
            duration: remaining,
            action: CheckoutAction::ReservationExpired { order_id }
        }
    }
}

impl Reducer for CheckoutReducer {
    type State = CheckoutState;
    type Action = CheckoutAction;
    type Environment = CheckoutEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        tracing::trace!(action = action.name(), event = action.is_event(), "Reducing");
        match action {
            // ========== Placing orders ==========
            CheckoutAction::PlaceOrder {
                order_id,
                user_id,
                product_id,
                quantity,
                contact,
                customer,
            } => {
                if state.orders.contains_key(&order_id) {
                    tracing::warn!(order_id = %order_id, "Duplicate PlaceOrder ignored");
                    return SmallVec::new();
                }

                let (product, total) = match Self::validate_placement(state, &product_id, quantity) {
                    Ok(valid) => valid,
                    Err(reason) => {
                        tracing::info!(
                            order_id = %order_id,
                            product_id = %product_id,
                            quantity,
                            reason = %reason,
                            "Order rejected"
                        );
                        return Self::reject(order_id, reason);
                    },
                };

                let now = env.clock.now();
                let ttl = env.settings.reservation_ttl;
                let order = Order {
                    id: order_id,
                    user_id,
                    product_id,
                    quantity,
                    unit_price: product.unit_price,
                    total,
                    status: OrderStatus::Pending,
                    failure_reason: None,
                    payment_intent_id: None,
                    client_secret: None,
                    contact,
                    created_at: now,
                    updated_at: now,
                    reservation_expires_at: now
                        + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
                    completed_at: None,
                    confirmation_sent_at: None,
                    refund_requested_at: None,
                    refund_id: None,
                    version: 1,
                };

                Self::apply_event(state, &CheckoutAction::OrderPlaced { order: order.clone() });
                CheckoutMetrics::record_placed();
                tracing::info!(
                    order_id = %order_id,
                    product_id = %product_id,
                    quantity,
                    total = total.cents(),
                    "Order placed, stock reserved"
                );

                let Some((order, product)) = Self::order_and_product(state, order_id) else {
                    return SmallVec::new();
                };

                smallvec![
                    Self::create_payment_intent(
                        env,
                        PaymentIntentRequest {
                            order_id,
                            amount: total,
                            currency: env.settings.currency.clone(),
                            customer,
                        },
                    ),
                    Self::persist_order(env, order, product),
                    Self::reservation_timer(order_id, ttl),
                ]
            },

            CheckoutAction::OrderPlaced { .. } => {
                Self::apply_event(state, &action);
                SmallVec::new()
            },

            CheckoutAction::OrderRejected { .. } => SmallVec::new(),

            // ========== Payment intent setup ==========
            CheckoutAction::PaymentIntentCreated {
                order_id,
                payment_intent_id,
                client_secret,
            } => {
                let now = env.clock.now();
                let Some(order) = state.orders.get_mut(&order_id) else {
                    tracing::warn!(order_id = %order_id, "Payment intent created for unknown order");
                    return smallvec![Self::cancel_payment_intent(env, payment_intent_id)];
                };

                if order.payment_intent_id.is_some() {
                    return SmallVec::new();
                }

                order.payment_intent_id = Some(payment_intent_id.clone());
                order.client_secret = Some(client_secret);
                order.touch(now);
                let still_pending = order.is_pending();
                state.orders_by_intent.insert(payment_intent_id.clone(), order_id);

                let Some((order, product)) = Self::order_and_product(state, order_id) else {
                    return SmallVec::new();
                };

                if still_pending {
                    smallvec![Self::persist_order(env, order, product)]
                } else {
                    tracing::info!(
                        order_id = %order_id,
                        payment_intent_id = %payment_intent_id,
                        "Payment intent arrived for a failed order, cancelling it"
                    );
                    smallvec![
                        Self::persist_order(env, order, product),
                        Self::cancel_payment_intent(env, payment_intent_id),
                    ]
                }
            },

            CheckoutAction::PaymentIntentFailed { order_id, reason } => {
                tracing::warn!(order_id = %order_id, reason = %reason, "Payment intent could not be created");
                match Self::fail_order(state, order_id, format!("payment setup failed: {reason}"), env) {
                    Some((order, product)) => {
                        CheckoutMetrics::record_failed("intent_failed");
                        smallvec![Self::persist_order(env, order, product)]
                    },
                    None => SmallVec::new(),
                }
            },

            // ========== Processor notifications ==========
            CheckoutAction::PaymentSucceeded { payment_intent_id } => {
                let Some(order) = state.order_for_intent(&payment_intent_id) else {
                    tracing::warn!(
                        payment_intent_id = %payment_intent_id,
                        "Payment succeeded for unknown intent, ignoring"
                    );
                    return SmallVec::new();
                };
                let (order_id, status) = (order.id, order.status);
                let refund_requested = order.refund_requested_at.is_some();

                match status {
                    OrderStatus::Pending => {
                        let Some((order, product)) = Self::complete_order(state, order_id, env) else {
                            return SmallVec::new();
                        };
                        CheckoutMetrics::record_completed();
                        tracing::info!(
                            order_id = %order_id,
                            payment_intent_id = %payment_intent_id,
                            "Order completed, stock committed"
                        );

                        let confirmation = OrderConfirmation::new(&order, &product);
                        smallvec![
                            Self::persist_order(env, order, product),
                            Self::send_confirmation(env, confirmation),
                        ]
                    },
                    OrderStatus::Completed => {
                        tracing::debug!(order_id = %order_id, "Duplicate payment notification ignored");
                        SmallVec::new()
                    },
                    OrderStatus::Failed => {
                        if refund_requested {
                            tracing::debug!(order_id = %order_id, "Refund already requested");
                            return SmallVec::new();
                        }

                        tracing::warn!(
                            order_id = %order_id,
                            payment_intent_id = %payment_intent_id,
                            "Payment succeeded for a failed order, refunding"
                        );
                        let now = env.clock.now();
                        if let Some(order) = state.orders.get_mut(&order_id) {
                            order.refund_requested_at = Some(now);
                            order.touch(now);
                        }
                        let Some((order, product)) = Self::order_and_product(state, order_id) else {
                            return SmallVec::new();
                        };

                        smallvec![
                            Self::persist_order(env, order, product),
                            Self::refund(env, order_id, payment_intent_id),
                        ]
                    },
                }
            },

            CheckoutAction::PaymentFailed {
                payment_intent_id,
                reason,
            } => {
                let Some(order_id) = state.order_for_intent(&payment_intent_id).map(|o| o.id) else {
                    tracing::warn!(
                        payment_intent_id = %payment_intent_id,
                        "Payment failed for unknown intent, ignoring"
                    );
                    return SmallVec::new();
                };

                match Self::fail_order(state, order_id, reason.clone(), env) {
                    Some((order, product)) => {
                        CheckoutMetrics::record_failed("payment_failed");
                        tracing::info!(order_id = %order_id, reason = %reason, "Order failed, stock released");
                        smallvec![Self::persist_order(env, order, product)]
                    },
                    None => {
                        tracing::debug!(order_id = %order_id, "Payment failure for settled order ignored");
                        SmallVec::new()
                    },
                }
            },

            // ========== Reservations ==========
            CheckoutAction::ReservationExpired { order_id } => {
                let Some((order, product)) =
                    Self::fail_order(state, order_id, "reservation expired".to_string(), env)
                else {
                    return SmallVec::new();
                };

                CheckoutMetrics::record_failed("reservation_expired");
                tracing::info!(order_id = %order_id, "Reservation expired, stock released");

                let intent = order.payment_intent_id.clone();
                let mut effects: Effects = smallvec![Self::persist_order(env, order, product)];
                if let Some(intent) = intent {
                    effects.push(Self::cancel_payment_intent(env, intent));
                }
                effects
            },

            CheckoutAction::RearmReservations => {
                let now = env.clock.now();
                let timers: Effects = state
                    .orders
                    .values()
                    .filter(|o| o.is_pending())
                    .map(|o| {
                        let remaining = (o.reservation_expires_at - now).to_std().unwrap_or_default();
                        Self::reservation_timer(o.id, remaining)
                    })
                    .collect();

                tracing::info!(pending = timers.len(), "Reservation timers rearmed");
                timers
            },

            // ========== Notifications and compensation ==========
            CheckoutAction::ConfirmationSent { order_id } => {
                let now = env.clock.now();
                let Some(order) = state.orders.get_mut(&order_id) else {
                    return SmallVec::new();
                };
                order.confirmation_sent_at = Some(now);
                order.touch(now);

                match Self::order_and_product(state, order_id) {
                    Some((order, product)) => smallvec![Self::persist_order(env, order, product)],
                    None => SmallVec::new(),
                }
            },

            CheckoutAction::ConfirmationFailed { order_id, error } => {
                tracing::error!(
                    order_id = %order_id,
                    error = %error,
                    "Confirmation email not delivered after retries"
                );
                SmallVec::new()
            },

            CheckoutAction::RefundIssued { order_id, refund_id } => {
                let now = env.clock.now();
                let Some(order) = state.orders.get_mut(&order_id) else {
                    return SmallVec::new();
                };
                order.refund_id = Some(refund_id.clone());
                order.touch(now);
                CheckoutMetrics::record_refund();
                tracing::info!(order_id = %order_id, refund_id = %refund_id, "Refund issued");

                match Self::order_and_product(state, order_id) {
                    Some((order, product)) => smallvec![Self::persist_order(env, order, product)],
                    None => SmallVec::new(),
                }
            },

            CheckoutAction::RefundFailed { order_id, error } => {
                tracing::error!(
                    order_id = %order_id,
                    error = %error,
                    "Refund not issued after retries; needs manual follow-up"
                );
                SmallVec::new()
            },

            // ========== Catalog ==========
            CheckoutAction::ProductListed { product } => {
                let listed = match state.products.get_mut(&product.id) {
                    Some(existing) => {
                        existing.name = product.name;
                        existing.description = product.description;
                        existing.unit_price = product.unit_price;
                        existing.version += 1;
                        existing.clone()
                    },
                    None => {
                        let mut product = product;
                        product.reserved = 0;
                        product.version = product.version.max(1);
                        state.products.insert(product.id, product.clone());
                        product
                    },
                };
                tracing::info!(product_id = %listed.id, name = %listed.name, "Product listed");
                smallvec![Self::persist_product(env, listed)]
            },

            CheckoutAction::ProductRestocked {
                product_id,
                quantity,
            } => {
                let Some(product) = state.products.get_mut(&product_id) else {
                    tracing::warn!(product_id = %product_id, "Restock for unknown product ignored");
                    return SmallVec::new();
                };
                let Some(inventory) = product.inventory.checked_add(quantity) else {
                    tracing::warn!(product_id = %product_id, quantity, "Restock would overflow inventory");
                    return SmallVec::new();
                };
                product.inventory = inventory;
                product.version += 1;
                tracing::info!(product_id = %product_id, quantity, inventory, "Product restocked");
                smallvec![Self::persist_product(env, product.clone())]
            },
        }
    }
}
