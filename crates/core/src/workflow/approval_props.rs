//! Property-based tests for ApprovalPolicy tier matching.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::workflow::approval::{ApprovalPolicy, ApprovalRule};
use crate::workflow::types::{RequestPayload, RequestType};

/// Strategy for generating random positive Decimal amounts.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|n| Decimal::new(n, 2))
}

/// Strategy for generating a rule with an optional amount window.
fn arb_rule() -> impl Strategy<Value = ApprovalRule> {
    (
        proptest::option::of(0i64..50_000i64),
        proptest::option::of(0i64..50_000i64),
        -100i16..100i16,
        "[a-z]{3,10}",
    )
        .prop_map(|(min, max, priority, role)| ApprovalRule {
            id: Uuid::nil(),
            name: format!("{role} tier"),
            min_amount: min.map(Decimal::from),
            max_amount: max.map(Decimal::from),
            request_types: vec![RequestType::Purchase],
            required_role: role,
            priority,
            timeout_hours: None,
        })
}

fn purchase(amount: Decimal) -> RequestPayload {
    RequestPayload::Purchase {
        amount,
        currency: "USD".to_string(),
        vendor: "Initech".to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Matching tiers always come back in ascending priority order
    #[test]
    fn prop_tiers_sorted_by_priority(
        rules in proptest::collection::vec(arb_rule(), 0..12),
        amount in arb_amount(),
    ) {
        let policy = ApprovalPolicy::new(rules);
        let tiers = policy.required_tiers(&purchase(amount));
        for pair in tiers.windows(2) {
            prop_assert!(pair[0].priority <= pair[1].priority);
        }
    }

    /// Every returned tier's window contains the amount, and every rule whose
    /// window contains it is returned
    #[test]
    fn prop_tiers_are_exactly_the_matching_windows(
        rules in proptest::collection::vec(arb_rule(), 0..12),
        amount in arb_amount(),
    ) {
        let policy = ApprovalPolicy::new(rules.clone());
        let tiers = policy.required_tiers(&purchase(amount));

        let expected = rules
            .iter()
            .filter(|r| {
                r.min_amount.is_none_or(|min| amount >= min)
                    && r.max_amount.is_none_or(|max| amount <= max)
            })
            .count();
        prop_assert_eq!(tiers.len(), expected);
    }

    /// Rules scoped to another request type never match
    #[test]
    fn prop_type_scoping(
        rules in proptest::collection::vec(arb_rule(), 0..12),
        amount in arb_amount(),
    ) {
        let policy = ApprovalPolicy::new(rules);
        let expense = RequestPayload::Expense {
            amount,
            currency: "USD".to_string(),
            category: "travel".to_string(),
        };
        prop_assert!(policy.required_tiers(&expense).is_empty());
    }

    /// Raising the amount never removes an open-ended default tier
    #[test]
    fn prop_default_tiers_monotonic(a in arb_amount(), b in arb_amount()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let policy = ApprovalPolicy::default_tiers();
        let low_count = policy.required_tiers(&purchase(low)).len();
        let high_count = policy.required_tiers(&purchase(high)).len();
        prop_assert!(low_count <= high_count);
    }
}

// =========================================================================
// Unit tests for edge cases
// =========================================================================

#[cfg(test)]
mod edge_case_tests {
    use super::*;

    #[test]
    fn test_empty_policy_returns_no_tiers() {
        let policy = ApprovalPolicy::default();
        assert!(policy.required_tiers(&purchase(Decimal::from(50_000))).is_empty());
    }

    #[test]
    fn test_exact_max_amount_boundary() {
        let policy = ApprovalPolicy::new(vec![ApprovalRule {
            id: Uuid::nil(),
            name: "Up to 500".to_string(),
            min_amount: None,
            max_amount: Some(Decimal::from(500)),
            request_types: vec![],
            required_role: "lead".to_string(),
            priority: 1,
            timeout_hours: None,
        }]);

        assert_eq!(policy.required_tiers(&purchase(Decimal::from(500))).len(), 1);
        assert!(policy.required_tiers(&purchase(Decimal::new(50001, 2))).is_empty());
    }

    #[test]
    fn test_equal_priorities_keep_configuration_order() {
        let rule = |role: &str| ApprovalRule {
            id: Uuid::nil(),
            name: role.to_string(),
            min_amount: None,
            max_amount: None,
            request_types: vec![],
            required_role: role.to_string(),
            priority: 5,
            timeout_hours: None,
        };
        let policy = ApprovalPolicy::new(vec![rule("legal"), rule("security")]);
        let tiers = policy.required_tiers(&purchase(Decimal::ONE));
        assert_eq!(tiers[0].required_role, "legal");
        assert_eq!(tiers[1].required_role, "security");
    }
}
