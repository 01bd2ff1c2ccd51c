//! Property-based tests for the pricing and matching invariants.

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_sync::models::{from_minor, to_minor, LineItem, LineKind};
use storefront_sync::services::bundle_expander::{allocate, expand};
use storefront_sync::services::delivery_slot::parse_time_slot;
use storefront_sync::services::territory_resolver::normalize_label;

fn minor_price() -> impl Strategy<Value = i64> {
    0i64..5_000_000
}

fn bundle_strategy() -> impl Strategy<Value = (i64, i64, Vec<(i64, i64)>)> {
    (
        1i64..5_000_000,
        1i64..5,
        prop::collection::vec((1i64..1_000_000, 1i64..6), 1..8),
    )
}

fn item(line_id: i64, product_id: i64, minor: i64, quantity: i64) -> LineItem {
    LineItem {
        line_id,
        product_id,
        sku: None,
        name: format!("P{}", product_id),
        quantity,
        unit_price: from_minor(minor),
        is_bundle_parent: false,
        parent_link: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn allocation_sums_to_target(target in minor_price(), weights in prop::collection::vec(1i64..1_000_000, 1..10)) {
        let nets = allocate(target, &weights).unwrap();
        prop_assert_eq!(nets.len(), weights.len());
        prop_assert_eq!(nets.iter().sum::<i64>(), target);
        prop_assert!(nets.iter().all(|n| *n >= 0));
    }

    #[test]
    fn expanded_bundle_children_sum_to_bundle((price, qty, children) in bundle_strategy()) {
        let mut lines = vec![LineItem { is_bundle_parent: true, ..item(1, 900, price, qty) }];
        for (i, (child_price, child_qty)) in children.iter().enumerate() {
            lines.push(LineItem {
                parent_link: Some(900),
                ..item(i as i64 + 2, i as i64 + 1000, *child_price, *child_qty)
            });
        }

        let out = expand(&lines).unwrap();
        let parent = &out[0];
        prop_assert_eq!(parent.kind, LineKind::BundleParent);
        prop_assert_eq!(parent.net_amount, Decimal::ZERO);

        let children_total: i64 = out[1..].iter().map(|l| to_minor(l.net_amount).unwrap()).sum();
        prop_assert_eq!(children_total, price * qty);
        for row in &out[1..] {
            prop_assert!(row.discount_percentage <= Decimal::ONE_HUNDRED);
        }
    }

    #[test]
    fn label_normalization_is_idempotent(label in "[A-Za-zÀ-ÿ ]{0,30}") {
        let once = normalize_label(&label);
        prop_assert_eq!(normalize_label(&once), once.clone());
        prop_assert_eq!(once.trim(), once.as_str());
    }

    #[test]
    fn time_slots_last_less_than_a_day(h1 in 0u32..24, m1 in 0u32..60, h2 in 0u32..24, m2 in 0u32..60) {
        let raw = format!("{:02}:{:02} - {:02}:{:02}", h1, m1, h2, m2);
        let (_, minutes) = parse_time_slot(&raw).unwrap();
        prop_assert!((1..=24 * 60).contains(&minutes));
    }
}
