//! 4-way invoice matching: quotation, purchase order, goods receipts.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Three-valued match classification persisted verbatim on the invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Mismatched,
    NotApplicable,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Mismatched => "mismatched",
            Self::NotApplicable => "not_applicable",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "matched" => Some(Self::Matched),
            "mismatched" => Some(Self::Mismatched),
            "not_applicable" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

/// Wire shape `{quotation_match, po_match, grn_match}` required by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchingResults {
    pub quotation_match: MatchStatus,
    pub po_match: MatchStatus,
    pub grn_match: MatchStatus,
}

/// Tolerances for the amount comparisons. Quantity comparison is exact.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub quotation_tolerance_pct: Decimal,
    pub rate_tolerance_pct: Decimal,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            quotation_tolerance_pct: dec!(1.0),
            rate_tolerance_pct: dec!(2.0),
        }
    }
}

/// Invoice line under evaluation.
#[derive(Debug, Clone)]
pub struct DraftLine {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

/// Purchase order line snapshot.
#[derive(Debug, Clone)]
pub struct PoLineSnapshot {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

/// Where the matching decision routes the invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceDisposition {
    Approved,
    AwaitingGrn,
    Hold,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub disposition: InvoiceDisposition,
    pub hold_reason: Option<String>,
    pub results: MatchingResults,
}

fn within_tolerance(actual: Decimal, expected: Decimal, tolerance_pct: Decimal) -> bool {
    let allowed = expected.abs() * tolerance_pct / dec!(100);
    (actual - expected).abs() <= allowed
}

/// Evaluates a draft invoice against its PO, best quotation, and cumulative
/// receipts.
///
/// `quotation_total` is `Some` only when the PO's linked quotation exists and
/// is flagged best. `received_by_item` is `None` when the PO has no GRN rows
/// at all (quantities cannot be verified before receipt).
///
/// Decision precedence: hold > awaiting_grn > approved. Every mismatch
/// contributes a description carrying both documents' exact values and the
/// delta; the concatenation becomes the hold reason.
pub fn evaluate(
    invoice_total: Decimal,
    lines: &[DraftLine],
    po_lines: &[PoLineSnapshot],
    quotation_total: Option<Decimal>,
    received_by_item: Option<&HashMap<Uuid, Decimal>>,
    cfg: &MatchConfig,
) -> MatchOutcome {
    let mut reasons: Vec<String> = Vec::new();

    // Step 1: quotation total within tolerance
    let quotation_match = match quotation_total {
        None => MatchStatus::NotApplicable,
        Some(expected) => {
            if within_tolerance(invoice_total, expected, cfg.quotation_tolerance_pct) {
                MatchStatus::Matched
            } else {
                reasons.push(format!(
                    "invoice total {} deviates from best quotation total {} by {} (tolerance {}%)",
                    invoice_total,
                    expected,
                    (invoice_total - expected).abs(),
                    cfg.quotation_tolerance_pct
                ));
                MatchStatus::Mismatched
            }
        }
    };

    // Step 2: per-line PO comparison. Over-invoicing is a hard mismatch with
    // no tolerance; rate deviation is tolerated up to the configured percent.
    let po_by_item: HashMap<Uuid, &PoLineSnapshot> =
        po_lines.iter().map(|l| (l.item_id, l)).collect();

    let mut po_mismatched = false;
    for line in lines {
        match po_by_item.get(&line.item_id) {
            None => {
                po_mismatched = true;
                reasons.push(format!(
                    "item {} is not present on the purchase order",
                    line.item_id
                ));
            }
            Some(po_line) => {
                if line.quantity > po_line.quantity {
                    po_mismatched = true;
                    reasons.push(format!(
                        "invoiced quantity {} exceeds ordered quantity {} for item {} (over-invoiced by {})",
                        line.quantity,
                        po_line.quantity,
                        line.item_id,
                        line.quantity - po_line.quantity
                    ));
                }
                if !within_tolerance(line.rate, po_line.rate, cfg.rate_tolerance_pct) {
                    po_mismatched = true;
                    reasons.push(format!(
                        "invoice rate {} deviates from PO rate {} by {} for item {} (tolerance {}%)",
                        line.rate,
                        po_line.rate,
                        (line.rate - po_line.rate).abs(),
                        line.item_id,
                        cfg.rate_tolerance_pct
                    ));
                }
            }
        }
    }
    let po_match = if po_mismatched {
        MatchStatus::Mismatched
    } else {
        MatchStatus::Matched
    };

    // Step 3: invoiced quantity must be covered by cumulative receipts
    let mut awaiting_grn = false;
    let grn_match = match received_by_item {
        None => {
            awaiting_grn = true;
            MatchStatus::NotApplicable
        }
        Some(received) => {
            let mut grn_mismatched = false;
            for line in lines {
                let received_qty = received.get(&line.item_id).copied().unwrap_or(Decimal::ZERO);
                if line.quantity > received_qty {
                    grn_mismatched = true;
                    reasons.push(format!(
                        "invoiced quantity {} exceeds received quantity {} for item {} (short by {})",
                        line.quantity,
                        received_qty,
                        line.item_id,
                        line.quantity - received_qty
                    ));
                }
            }
            if grn_mismatched {
                MatchStatus::Mismatched
            } else {
                MatchStatus::Matched
            }
        }
    };

    let disposition = if !reasons.is_empty() {
        InvoiceDisposition::Hold
    } else if awaiting_grn {
        InvoiceDisposition::AwaitingGrn
    } else {
        InvoiceDisposition::Approved
    };

    let hold_reason = if disposition == InvoiceDisposition::Hold {
        Some(reasons.join("; "))
    } else {
        None
    };

    MatchOutcome {
        disposition,
        hold_reason,
        results: MatchingResults {
            quotation_match,
            po_match,
            grn_match,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> Uuid {
        Uuid::new_v4()
    }

    fn po_line(item_id: Uuid, quantity: Decimal, rate: Decimal) -> PoLineSnapshot {
        PoLineSnapshot {
            item_id,
            quantity,
            rate,
        }
    }

    fn draft(item_id: Uuid, quantity: Decimal, rate: Decimal) -> DraftLine {
        DraftLine {
            item_id,
            quantity,
            rate,
        }
    }

    #[test]
    fn clean_match_approves_with_no_hold_reason() {
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(10))].into_iter().collect();
        let outcome = evaluate(
            dec!(1000),
            &[draft(id, dec!(10), dec!(100))],
            &[po_line(id, dec!(10), dec!(100))],
            Some(dec!(1000)),
            Some(&received),
            &MatchConfig::default(),
        );

        assert_eq!(outcome.disposition, InvoiceDisposition::Approved);
        assert_eq!(outcome.hold_reason, None);
        assert_eq!(outcome.results.quotation_match, MatchStatus::Matched);
        assert_eq!(outcome.results.po_match, MatchStatus::Matched);
        assert_eq!(outcome.results.grn_match, MatchStatus::Matched);
    }

    #[test]
    fn quotation_within_one_percent_matches() {
        // PO total 100,000 vs quotation 100,500: 0.5% delta
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(1))].into_iter().collect();
        let outcome = evaluate(
            dec!(100000),
            &[draft(id, dec!(1), dec!(100000))],
            &[po_line(id, dec!(1), dec!(100000))],
            Some(dec!(100500)),
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.quotation_match, MatchStatus::Matched);
        assert_eq!(outcome.disposition, InvoiceDisposition::Approved);
    }

    #[test]
    fn quotation_five_percent_delta_mismatches_and_holds() {
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(1))].into_iter().collect();
        let outcome = evaluate(
            dec!(100000),
            &[draft(id, dec!(1), dec!(100000))],
            &[po_line(id, dec!(1), dec!(100000))],
            Some(dec!(105000)),
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.quotation_match, MatchStatus::Mismatched);
        assert_eq!(outcome.disposition, InvoiceDisposition::Hold);
        let reason = outcome.hold_reason.expect("hold must carry a reason");
        assert!(reason.contains("100000"));
        assert!(reason.contains("105000"));
        assert!(reason.contains("5000"));
    }

    #[test]
    fn missing_quotation_is_not_applicable() {
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(5))].into_iter().collect();
        let outcome = evaluate(
            dec!(500),
            &[draft(id, dec!(5), dec!(100))],
            &[po_line(id, dec!(5), dec!(100))],
            None,
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.quotation_match, MatchStatus::NotApplicable);
        assert_eq!(outcome.disposition, InvoiceDisposition::Approved);
    }

    #[test]
    fn over_invoiced_quantity_is_a_hard_mismatch() {
        // Quantity has no tolerance even when the amounts line up
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(11))].into_iter().collect();
        let outcome = evaluate(
            dec!(1100),
            &[draft(id, dec!(11), dec!(100))],
            &[po_line(id, dec!(10), dec!(100))],
            None,
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.po_match, MatchStatus::Mismatched);
        assert_eq!(outcome.disposition, InvoiceDisposition::Hold);
        assert!(outcome.hold_reason.unwrap().contains("over-invoiced by 1"));
    }

    #[test]
    fn rate_within_two_percent_matches() {
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(10))].into_iter().collect();
        let outcome = evaluate(
            dec!(1015),
            &[draft(id, dec!(10), dec!(101.5))],
            &[po_line(id, dec!(10), dec!(100))],
            None,
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.po_match, MatchStatus::Matched);
    }

    #[test]
    fn rate_outside_two_percent_holds() {
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(10))].into_iter().collect();
        let outcome = evaluate(
            dec!(1050),
            &[draft(id, dec!(10), dec!(105))],
            &[po_line(id, dec!(10), dec!(100))],
            None,
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.po_match, MatchStatus::Mismatched);
        assert_eq!(outcome.disposition, InvoiceDisposition::Hold);
    }

    #[test]
    fn no_grn_rows_routes_to_awaiting_grn() {
        let id = item();
        let outcome = evaluate(
            dec!(1000),
            &[draft(id, dec!(10), dec!(100))],
            &[po_line(id, dec!(10), dec!(100))],
            Some(dec!(1000)),
            None,
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.grn_match, MatchStatus::NotApplicable);
        assert_eq!(outcome.disposition, InvoiceDisposition::AwaitingGrn);
        assert_eq!(outcome.hold_reason, None);
    }

    #[test]
    fn hold_wins_over_awaiting_grn() {
        // Price mismatch is reported even though no GRN exists yet
        let id = item();
        let outcome = evaluate(
            dec!(1050),
            &[draft(id, dec!(10), dec!(105))],
            &[po_line(id, dec!(10), dec!(100))],
            None,
            None,
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.grn_match, MatchStatus::NotApplicable);
        assert_eq!(outcome.disposition, InvoiceDisposition::Hold);
        assert!(outcome.hold_reason.is_some());
    }

    #[test]
    fn invoicing_beyond_received_quantity_holds() {
        let id = item();
        let received: HashMap<Uuid, Decimal> = [(id, dec!(6))].into_iter().collect();
        let outcome = evaluate(
            dec!(1000),
            &[draft(id, dec!(10), dec!(100))],
            &[po_line(id, dec!(10), dec!(100))],
            None,
            Some(&received),
            &MatchConfig::default(),
        );
        assert_eq!(outcome.results.grn_match, MatchStatus::Mismatched);
        assert_eq!(outcome.disposition, InvoiceDisposition::Hold);
        assert!(outcome.hold_reason.unwrap().contains("short by 4"));
    }

    #[test]
    fn every_mismatch_is_reported_in_the_reason() {
        let a = item();
        let b = item();
        let received: HashMap<Uuid, Decimal> = [(a, dec!(10)), (b, dec!(2))].into_iter().collect();
        let outcome = evaluate(
            dec!(9999),
            &[draft(a, dec!(12), dec!(100)), draft(b, dec!(2), dec!(120))],
            &[po_line(a, dec!(10), dec!(100)), po_line(b, dec!(2), dec!(100))],
            Some(dec!(5000)),
            Some(&received),
            &MatchConfig::default(),
        );
        let reason = outcome.hold_reason.unwrap();
        // quotation, over-invoice, rate, and receipt shortfall all present
        assert!(reason.contains("quotation"));
        assert!(reason.contains("ordered quantity"));
        assert!(reason.contains("PO rate"));
        assert!(reason.matches("; ").count() >= 2);
    }

    #[test]
    fn match_status_round_trips_wire_values() {
        for status in [
            MatchStatus::Matched,
            MatchStatus::Mismatched,
            MatchStatus::NotApplicable,
        ] {
            assert_eq!(MatchStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(
            serde_json::to_string(&MatchStatus::NotApplicable).unwrap(),
            "\"not_applicable\""
        );
    }
}
