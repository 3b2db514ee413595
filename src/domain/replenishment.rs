//! Shortfall arithmetic for the cascade orchestrator.

use crate::entities::bom_component;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Units that must be produced to cover a sales order line.
pub fn finished_goods_shortfall(ordered: Decimal, available: Decimal) -> Decimal {
    (ordered - available).max(Decimal::ZERO)
}

/// Raw material needed to run a production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MaterialRequirement {
    pub item_id: Uuid,
    pub required: Decimal,
    pub uom: String,
}

/// Expands a BOM: required = quantity_per_unit x quantity_planned per
/// component.
pub fn expand_bom(
    components: &[bom_component::Model],
    quantity_planned: Decimal,
) -> Vec<MaterialRequirement> {
    components
        .iter()
        .map(|c| MaterialRequirement {
            item_id: c.item_id,
            required: c.quantity_per_unit * quantity_planned,
            uom: c.uom.clone(),
        })
        .collect()
}

/// One raw-material deficit line feeding a consolidated purchase requisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShortfallLine {
    pub item_id: Uuid,
    pub required: Decimal,
    pub available: Decimal,
    pub shortfall: Decimal,
    pub uom: String,
}

/// Nets requirements against available stock, keeping only deficits.
pub fn material_shortfalls(
    requirements: &[MaterialRequirement],
    available_by_item: &HashMap<Uuid, Decimal>,
) -> Vec<ShortfallLine> {
    requirements
        .iter()
        .filter_map(|req| {
            let available = available_by_item
                .get(&req.item_id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let shortfall = req.required - available;
            if shortfall > Decimal::ZERO {
                Some(ShortfallLine {
                    item_id: req.item_id,
                    required: req.required,
                    available,
                    shortfall,
                    uom: req.uom.clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn component(item_id: Uuid, quantity_per_unit: Decimal, uom: &str) -> bom_component::Model {
        bom_component::Model {
            id: Uuid::new_v4(),
            bom_id: Uuid::new_v4(),
            item_id,
            quantity_per_unit,
            uom: uom.to_string(),
            unit_cost: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn shortfall_is_ordered_minus_available_floored_at_zero() {
        // 500 ordered, 100 on hand
        assert_eq!(finished_goods_shortfall(dec!(500), dec!(100)), dec!(400));
        assert_eq!(finished_goods_shortfall(dec!(100), dec!(500)), dec!(0));
        assert_eq!(finished_goods_shortfall(dec!(100), dec!(100)), dec!(0));
    }

    #[test]
    fn negative_available_still_yields_full_requirement_plus_deficit() {
        assert_eq!(finished_goods_shortfall(dec!(10), dec!(-5)), dec!(15));
    }

    #[test]
    fn bom_expansion_scales_by_planned_quantity() {
        // 5 kg Steel Billet per unit, 1000 units planned
        let steel = Uuid::new_v4();
        let reqs = expand_bom(&[component(steel, dec!(5), "kg")], dec!(1000));
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].required, dec!(5000));
        assert_eq!(reqs[0].uom, "kg");
    }

    #[test]
    fn netting_keeps_only_deficit_lines() {
        let steel = Uuid::new_v4();
        let bolts = Uuid::new_v4();
        let reqs = vec![
            MaterialRequirement {
                item_id: steel,
                required: dec!(5000),
                uom: "kg".into(),
            },
            MaterialRequirement {
                item_id: bolts,
                required: dec!(200),
                uom: "pcs".into(),
            },
        ];
        let available: HashMap<Uuid, Decimal> =
            [(steel, dec!(3000)), (bolts, dec!(1000))].into_iter().collect();

        let shortfalls = material_shortfalls(&reqs, &available);
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].item_id, steel);
        assert_eq!(shortfalls[0].shortfall, dec!(2000));
        assert_eq!(shortfalls[0].available, dec!(3000));
    }

    #[test]
    fn unknown_items_count_as_zero_available() {
        let item = Uuid::new_v4();
        let reqs = vec![MaterialRequirement {
            item_id: item,
            required: dec!(10),
            uom: "pcs".into(),
        }];
        let shortfalls = material_shortfalls(&reqs, &HashMap::new());
        assert_eq!(shortfalls[0].shortfall, dec!(10));
    }
}
