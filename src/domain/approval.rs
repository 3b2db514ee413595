//! Approval chain resolution and advancement over amount-banded rules.

use crate::entities::approval_rule;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One rung of a resolved approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainStep {
    pub level: i32,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Two or more active rules match the amount at the same level.
    Ambiguous { level: i32, rule_ids: Vec<Uuid> },
}

/// Resolves the chain a document of `amount` must climb. The [min, max] band
/// containing the amount (null min means 0, null max means unbounded) fixes
/// the top of the chain; every lower level approves first, so a higher-band
/// amount still passes through each rung below it. An empty chain means the
/// document needs no approval.
pub fn resolve_chain(
    rules: &[approval_rule::Model],
    document_type: &str,
    amount: Decimal,
) -> Result<Vec<ChainStep>, ChainError> {
    let candidates: Vec<&approval_rule::Model> = rules
        .iter()
        .filter(|r| r.is_active && r.document_type == document_type)
        .collect();

    let band_contains = |r: &approval_rule::Model| {
        let min = r.min_amount.unwrap_or(Decimal::ZERO);
        let max_ok = r.max_amount.map(|max| amount <= max).unwrap_or(true);
        min <= amount && max_ok
    };

    let top_level = match candidates
        .iter()
        .filter(|r| band_contains(r))
        .map(|r| r.approval_level)
        .max()
    {
        Some(level) => level,
        None => return Ok(Vec::new()),
    };

    let mut matched: Vec<&approval_rule::Model> = candidates
        .into_iter()
        .filter(|r| r.approval_level <= top_level)
        .collect();

    matched.sort_by_key(|r| r.approval_level);

    for window in matched.windows(2) {
        if window[0].approval_level == window[1].approval_level {
            let level = window[0].approval_level;
            let rule_ids = matched
                .iter()
                .filter(|r| r.approval_level == level)
                .map(|r| r.id)
                .collect();
            return Err(ChainError::Ambiguous { level, rule_ids });
        }
    }

    Ok(matched
        .into_iter()
        .map(|r| ChainStep {
            level: r.approval_level,
            role_name: r.role_name.clone(),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub new_level: i32,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceError {
    /// The approving role does not own the next pending level.
    WrongApprover { expected: String, got: String },
    /// The chain has already reached its highest level.
    AlreadyFinal,
    /// No approval chain applies to this document.
    EmptyChain,
}

/// Advances a document one rung. The approver must hold the role required at
/// the next pending step of the resolved chain; `is_final` flips when the
/// highest level is reached.
pub fn advance(
    chain: &[ChainStep],
    current_level: i32,
    approving_role: &str,
) -> Result<Advancement, AdvanceError> {
    if chain.is_empty() {
        return Err(AdvanceError::EmptyChain);
    }

    let next = chain
        .iter()
        .find(|step| step.level > current_level)
        .ok_or(AdvanceError::AlreadyFinal)?;

    if next.role_name != approving_role {
        return Err(AdvanceError::WrongApprover {
            expected: next.role_name.clone(),
            got: approving_role.to_string(),
        });
    }

    let top = chain.last().map(|s| s.level).unwrap_or(next.level);
    Ok(Advancement {
        new_level: next.level,
        is_final: next.level == top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn rule(
        document_type: &str,
        level: i32,
        role: &str,
        min: Option<Decimal>,
        max: Option<Decimal>,
    ) -> approval_rule::Model {
        approval_rule::Model {
            id: Uuid::new_v4(),
            document_type: document_type.to_string(),
            approval_level: level,
            role_name: role.to_string(),
            min_amount: min,
            max_amount: max,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn resolves_banded_chain_in_level_order() {
        // Level 1: 0..=100,000 Manager; level 2: 100,001.. Director. An
        // amount in the Director band still climbs through the Manager rung.
        let rules = vec![
            rule("purchase_order", 2, "Director", Some(dec!(100001)), None),
            rule(
                "purchase_order",
                1,
                "Manager",
                Some(dec!(0)),
                Some(dec!(100000)),
            ),
        ];

        let chain = resolve_chain(&rules, "purchase_order", dec!(250000)).unwrap();
        assert_eq!(
            chain,
            vec![
                ChainStep {
                    level: 1,
                    role_name: "Manager".into()
                },
                ChainStep {
                    level: 2,
                    role_name: "Director".into()
                },
            ]
        );
    }

    #[test]
    fn top_band_amount_walks_every_lower_level() {
        let rules = vec![
            rule(
                "purchase_order",
                1,
                "Manager",
                Some(dec!(0)),
                Some(dec!(100000)),
            ),
            rule(
                "purchase_order",
                2,
                "Director",
                Some(dec!(100001)),
                Some(dec!(1000000)),
            ),
            rule("purchase_order", 3, "CFO", Some(dec!(1000001)), None),
        ];

        let chain = resolve_chain(&rules, "purchase_order", dec!(5000000)).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].role_name, "Manager");
        assert_eq!(chain[1].role_name, "Director");
        assert_eq!(chain[2].role_name, "CFO");
    }

    #[test]
    fn amount_below_band_skips_rule() {
        let rules = vec![
            rule(
                "purchase_order",
                1,
                "Manager",
                Some(dec!(0)),
                Some(dec!(100000)),
            ),
            rule("purchase_order", 2, "Director", Some(dec!(100001)), None),
        ];

        let chain = resolve_chain(&rules, "purchase_order", dec!(50000)).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].role_name, "Manager");
    }

    #[test]
    fn no_matching_rule_means_auto_approval() {
        let rules = vec![rule(
            "purchase_order",
            1,
            "Manager",
            Some(dec!(10000)),
            None,
        )];
        let chain = resolve_chain(&rules, "purchase_order", dec!(500)).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn inactive_and_foreign_rules_are_ignored() {
        let mut inactive = rule("purchase_order", 1, "Manager", None, None);
        inactive.is_active = false;
        let foreign = rule("sales_order", 1, "Manager", None, None);

        let chain = resolve_chain(&[inactive, foreign], "purchase_order", dec!(100)).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn overlapping_bands_at_same_level_are_ambiguous() {
        let r1 = rule("purchase_order", 1, "Manager", Some(dec!(0)), None);
        let r2 = rule(
            "purchase_order",
            1,
            "Supervisor",
            Some(dec!(0)),
            Some(dec!(50000)),
        );
        let expected_ids = vec![r1.id, r2.id];

        let err = resolve_chain(&[r1, r2], "purchase_order", dec!(100)).unwrap_err();
        match err {
            ChainError::Ambiguous { level, mut rule_ids } => {
                assert_eq!(level, 1);
                rule_ids.sort();
                let mut expected = expected_ids;
                expected.sort();
                assert_eq!(rule_ids, expected);
            }
        }
    }

    #[test]
    fn null_bounds_mean_zero_and_infinity() {
        let rules = vec![rule("purchase_requisition", 1, "Manager", None, None)];
        assert_eq!(
            resolve_chain(&rules, "purchase_requisition", dec!(0))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            resolve_chain(&rules, "purchase_requisition", dec!(999999999))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn advance_walks_the_chain_in_order() {
        let chain = vec![
            ChainStep {
                level: 1,
                role_name: "Manager".into(),
            },
            ChainStep {
                level: 2,
                role_name: "Director".into(),
            },
        ];

        let first = advance(&chain, 0, "Manager").unwrap();
        assert_eq!(first.new_level, 1);
        assert!(!first.is_final);

        let second = advance(&chain, first.new_level, "Director").unwrap();
        assert_eq!(second.new_level, 2);
        assert!(second.is_final);
    }

    #[test]
    fn wrong_role_at_pending_level_is_rejected() {
        let chain = vec![
            ChainStep {
                level: 1,
                role_name: "Manager".into(),
            },
            ChainStep {
                level: 2,
                role_name: "Director".into(),
            },
        ];

        // A Manager attempting to approve at level 2
        let err = advance(&chain, 1, "Manager").unwrap_err();
        assert_eq!(
            err,
            AdvanceError::WrongApprover {
                expected: "Director".into(),
                got: "Manager".into()
            }
        );
    }

    #[test]
    fn advancing_past_the_top_fails() {
        let chain = vec![ChainStep {
            level: 1,
            role_name: "Manager".into(),
        }];
        assert_eq!(advance(&chain, 1, "Manager").unwrap_err(), AdvanceError::AlreadyFinal);
    }

    #[test]
    fn level_is_monotonic_across_successful_advances() {
        let chain = vec![
            ChainStep {
                level: 1,
                role_name: "A".into(),
            },
            ChainStep {
                level: 3,
                role_name: "B".into(),
            },
            ChainStep {
                level: 7,
                role_name: "C".into(),
            },
        ];

        let mut current = 0;
        for role in ["A", "B", "C"] {
            let adv = advance(&chain, current, role).unwrap();
            assert!(adv.new_level > current);
            current = adv.new_level;
        }
        assert_eq!(current, 7);
    }
}
