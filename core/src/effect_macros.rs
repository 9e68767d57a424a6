//! Shorthand for the two effects reducers build most.

/// [`Effect::Future`](crate::effect::Effect::Future) from an async body
/// evaluating to `Option<Action>`. The body is `async move`.
///
/// ```rust,ignore
/// async_effect! {
///     let intent = gateway.create_payment_intent(&request).await.ok()?;
///     Some(CheckoutAction::PaymentIntentCreated { order_id, payment_intent_id: intent.id, client_secret: intent.client_secret })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { $($body)* }))
    };
}

/// [`Effect::Delay`](crate::effect::Effect::Delay) that boxes the action.
///
/// ```rust,ignore
/// delay! {
///     duration: Duration::from_secs(15 * 60),
///     action: CheckoutAction::ReservationExpired { order_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (duration: $duration:expr, action: $action:expr $(,)?) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
