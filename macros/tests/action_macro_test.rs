//! Behaviour of the code generated by `#[derive(Action)]`.

use farmstand_macros::Action;
use uuid::Uuid;

#[derive(Action, Clone, Debug, PartialEq)]
enum StandAction {
    #[command]
    Reserve { product_id: Uuid, quantity: u32 },

    #[command]
    SweepExpired,

    #[event]
    Reserved { order_id: Uuid },

    #[event]
    Refunded(Uuid, String),

    #[event]
    ReceiptMailed,

    Tick,
}

fn every_variant() -> Vec<StandAction> {
    let id = Uuid::new_v4();
    vec![
        StandAction::Reserve {
            product_id: id,
            quantity: 3,
        },
        StandAction::SweepExpired,
        StandAction::Reserved { order_id: id },
        StandAction::Refunded(id, "re_1".into()),
        StandAction::ReceiptMailed,
        StandAction::Tick,
    ]
}

#[test]
fn commands_and_events_are_disjoint() {
    for action in every_variant() {
        assert!(
            !(action.is_command() && action.is_event()),
            "{} is both",
            action.name()
        );
    }
}

#[test]
fn tagged_variants_are_classified() {
    let commands: Vec<_> = every_variant()
        .into_iter()
        .filter(StandAction::is_command)
        .map(|a| a.name())
        .collect();
    let events: Vec<_> = every_variant()
        .into_iter()
        .filter(StandAction::is_event)
        .map(|a| a.name())
        .collect();

    assert_eq!(commands, ["Reserve", "SweepExpired"]);
    assert_eq!(events, ["Reserved", "Refunded", "ReceiptMailed"]);
}

#[test]
fn event_type_snake_cases_events_only() {
    let types: Vec<_> = every_variant().iter().map(StandAction::event_type).collect();

    assert_eq!(
        types,
        ["unknown", "unknown", "reserved", "refunded", "receipt_mailed", "unknown"]
    );
}

#[test]
fn untagged_variant_still_has_a_name() {
    assert_eq!(StandAction::Tick.name(), "Tick");
    assert!(!StandAction::Tick.is_command());
    assert!(!StandAction::Tick.is_event());
}
