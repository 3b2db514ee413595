//! Service-level tests for the cascade orchestrator.
//!
//! Tests cover:
//! - Status gating on both cascade entry points
//! - Idempotency through the cascade link ledger
//! - Stock netting outcomes per sales order line
//! - Raw-material requisition gating on the BOM

use assert_matches::assert_matches;
use chrono::Utc;
use fabriq_api::{
    config::CascadeConfig,
    entities::{
        approval_rule, bom, bom_component, cascade_link, production_order, purchase_requisition,
        sales_order, sales_order_line, status_log, stock_level,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{approvals::ApprovalService, cascade::{CascadeService, LineCascadeOutcome, RequisitionOutcome}},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn service(db: DatabaseConnection) -> (CascadeService, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(16);
    let sender = EventSender::new(tx);
    let pool = Arc::new(db);
    let approvals = Arc::new(ApprovalService::new(pool.clone(), sender.clone()));
    (
        CascadeService::new(pool, sender, approvals, CascadeConfig::default()),
        rx,
    )
}

fn confirmed_order(id: Uuid) -> sales_order::Model {
    sales_order::Model {
        id,
        order_number: "SO-0001".to_string(),
        party_id: Uuid::new_v4(),
        status: "confirmed".to_string(),
        total_amount: dec!(5000),
        current_level: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn order_line(sales_order_id: Uuid, item_id: Uuid, quantity: Decimal) -> sales_order_line::Model {
    sales_order_line::Model {
        id: Uuid::new_v4(),
        sales_order_id,
        item_id,
        quantity,
        rate: dec!(100),
        amount: quantity * dec!(100),
        needs_production: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn stock_row(item_id: Uuid, quantity: Decimal, reserved: Decimal) -> stock_level::Model {
    stock_level::Model {
        id: Uuid::new_v4(),
        item_id,
        warehouse: "MAIN".to_string(),
        quantity,
        reserved_quantity: reserved,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn link(
    source_type: &str,
    source_id: Uuid,
    target_type: &str,
    target_id: Uuid,
    target_item_id: Uuid,
) -> cascade_link::Model {
    cascade_link::Model {
        id: Uuid::new_v4(),
        source_type: source_type.to_string(),
        source_id,
        target_type: target_type.to_string(),
        target_id,
        target_item_id,
        created_at: Utc::now(),
    }
}

fn in_progress_mo(id: Uuid, bom_id: Uuid, finished_item_id: Uuid) -> production_order::Model {
    production_order::Model {
        id,
        order_number: "MO-0001".to_string(),
        bom_id,
        finished_item_id,
        quantity_planned: dec!(10),
        quantity_produced: Decimal::ZERO,
        quantity_rejected: Decimal::ZERO,
        status: "in_progress".to_string(),
        source_type: None,
        source_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn requisition(id: Uuid, status: &str, value: Decimal) -> purchase_requisition::Model {
    purchase_requisition::Model {
        id,
        pr_number: "PR-0001".to_string(),
        department: "production".to_string(),
        status: status.to_string(),
        current_level: 0,
        estimated_value: value,
        source_type: Some("production_order".to_string()),
        source_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn unconfirmed_sales_order_does_not_cascade() {
    let so_id = Uuid::new_v4();
    let mut draft = confirmed_order(so_id);
    draft.status = "draft".to_string();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![draft]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.on_sales_order_confirmed(so_id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn already_cascaded_line_is_reported_not_repeated() {
    let so_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let existing_mo = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![confirmed_order(so_id)]])
        .append_query_results(vec![vec![order_line(so_id, item_id, dec!(5))]])
        .append_query_results(vec![vec![link(
            "sales_order",
            so_id,
            "production_order",
            existing_mo,
            item_id,
        )]])
        .into_connection();
    let (service, _rx) = service(db);

    let outcomes = service.on_sales_order_confirmed(so_id).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_matches!(&outcomes[0], LineCascadeOutcome::AlreadyTriggered { item_id: reported, production_order_id } => {
        assert_eq!(*reported, item_id);
        assert_eq!(*production_order_id, Some(existing_mo));
    });
}

#[tokio::test]
async fn fulfilled_line_is_not_reserved_again_on_retry() {
    let so_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();

    // The first run recorded a stock-reservation link; the retry stops at
    // the ledger without touching stock
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![confirmed_order(so_id)]])
        .append_query_results(vec![vec![order_line(so_id, item_id, dec!(5))]])
        .append_query_results(vec![vec![link(
            "sales_order",
            so_id,
            "stock_reservation",
            Uuid::nil(),
            item_id,
        )]])
        .into_connection();
    let (service, mut rx) = service(db);

    let outcomes = service.on_sales_order_confirmed(so_id).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_matches!(&outcomes[0], LineCascadeOutcome::AlreadyTriggered { item_id: reported, production_order_id } => {
        assert_eq!(*reported, item_id);
        assert_eq!(*production_order_id, None);
    });
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sufficient_stock_fulfills_the_line_with_a_reservation() {
    let so_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![confirmed_order(so_id)]])
        .append_query_results(vec![vec![order_line(so_id, item_id, dec!(5))]])
        .append_query_results(vec![Vec::<cascade_link::Model>::new()])
        // In-transaction availability read, then the ledger insert
        .append_query_results(vec![vec![stock_row(item_id, dec!(10), Decimal::ZERO)]])
        .append_query_results(vec![vec![link(
            "sales_order",
            so_id,
            "stock_reservation",
            Uuid::nil(),
            item_id,
        )]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, mut rx) = service(db);

    let outcomes = service.on_sales_order_confirmed(so_id).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_matches!(&outcomes[0], LineCascadeOutcome::FulfilledFromStock { item_id: reported, reserved } => {
        assert_eq!(*reported, item_id);
        assert_eq!(*reserved, dec!(5));
    });

    let event = rx.try_recv().expect("the reservation must be announced");
    assert_matches!(event, Event::StockReserved { item_id: reserved_item, quantity, .. } => {
        assert_eq!(reserved_item, item_id);
        assert_eq!(quantity, dec!(5));
    });
}

#[tokio::test]
async fn short_line_without_a_bom_is_an_outcome_not_an_abort() {
    let so_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![confirmed_order(so_id)]])
        .append_query_results(vec![vec![order_line(so_id, item_id, dec!(5))]])
        .append_query_results(vec![Vec::<cascade_link::Model>::new()])
        // No finished-goods stock at all
        .append_query_results(vec![Vec::<stock_level::Model>::new()])
        // No active BOM either
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .into_connection();
    let (service, _rx) = service(db);

    let outcomes = service.on_sales_order_confirmed(so_id).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_matches!(&outcomes[0], LineCascadeOutcome::NoBomDefined { item_id: reported, shortfall } => {
        assert_eq!(*reported, item_id);
        assert_eq!(*shortfall, dec!(5));
    });
}

#[tokio::test]
async fn production_order_must_be_in_progress_to_cascade() {
    let mo_id = Uuid::new_v4();
    let mut draft = in_progress_mo(mo_id, Uuid::new_v4(), Uuid::new_v4());
    draft.status = "draft".to_string();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![draft]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.on_production_order_started(mo_id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn second_start_finds_the_requisition_link_and_stops() {
    let mo_id = Uuid::new_v4();
    let existing_pr = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![in_progress_mo(mo_id, Uuid::new_v4(), Uuid::new_v4())]])
        .append_query_results(vec![vec![link(
            "production_order",
            mo_id,
            "purchase_requisition",
            existing_pr,
            Uuid::nil(),
        )]])
        // The requisition already left draft; nothing to re-route
        .append_query_results(vec![vec![requisition(existing_pr, "submitted", dec!(150000))]])
        .into_connection();
    let (service, _rx) = service(db);

    let outcome = service.on_production_order_started(mo_id).await.unwrap();
    assert_matches!(outcome, RequisitionOutcome::AlreadyTriggered { requisition_id } => {
        assert_eq!(requisition_id, existing_pr);
    });
}

#[tokio::test]
async fn second_start_submits_a_draft_requisition_that_missed_routing() {
    let mo_id = Uuid::new_v4();
    let existing_pr = Uuid::new_v4();

    // First run committed the requisition above the approval threshold but
    // failed before submitting it; the retry routes it from the ledger hit
    let rule = approval_rule::Model {
        id: Uuid::new_v4(),
        document_type: "purchase_requisition".to_string(),
        approval_level: 1,
        role_name: "Manager".to_string(),
        min_amount: None,
        max_amount: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let transition = status_log::Model {
        id: Uuid::new_v4(),
        document_type: "purchase_requisition".to_string(),
        document_id: existing_pr,
        from_status: "draft".to_string(),
        to_status: "submitted".to_string(),
        reason: None,
        occurred_at: Utc::now(),
    };

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![in_progress_mo(mo_id, Uuid::new_v4(), Uuid::new_v4())]])
        .append_query_results(vec![vec![link(
            "production_order",
            mo_id,
            "purchase_requisition",
            existing_pr,
            Uuid::nil(),
        )]])
        .append_query_results(vec![vec![requisition(existing_pr, "draft", dec!(150000))]])
        // The submit inside the routing check loads the document and rules
        .append_query_results(vec![vec![requisition(existing_pr, "draft", dec!(150000))]])
        .append_query_results(vec![vec![rule]])
        .append_query_results(vec![vec![transition]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, _rx) = service(db);

    let outcome = service.on_production_order_started(mo_id).await.unwrap();
    assert_matches!(outcome, RequisitionOutcome::AlreadyTriggered { requisition_id } => {
        assert_eq!(requisition_id, existing_pr);
    });
}

#[tokio::test]
async fn started_order_with_no_components_is_a_bom_error() {
    let mo_id = Uuid::new_v4();
    let finished_item = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![in_progress_mo(mo_id, Uuid::new_v4(), finished_item)]])
        .append_query_results(vec![Vec::<cascade_link::Model>::new()])
        .append_query_results(vec![Vec::<bom_component::Model>::new()])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.on_production_order_started(mo_id).await.unwrap_err();
    assert_matches!(err, ServiceError::NoBomDefined(item) => assert_eq!(item, finished_item));
}

#[tokio::test]
async fn full_raw_material_coverage_reserves_and_raises_nothing() {
    let mo_id = Uuid::new_v4();
    let bom_id = Uuid::new_v4();
    let component_item = Uuid::new_v4();

    let component = bom_component::Model {
        id: Uuid::new_v4(),
        bom_id,
        item_id: component_item,
        quantity_per_unit: dec!(2),
        uom: "kg".to_string(),
        unit_cost: Some(dec!(50)),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![in_progress_mo(mo_id, bom_id, Uuid::new_v4())]])
        .append_query_results(vec![Vec::<cascade_link::Model>::new()])
        .append_query_results(vec![vec![component]])
        // 10 planned x 2 per unit = 20 required; 25 on hand
        .append_query_results(vec![vec![stock_row(component_item, dec!(25), Decimal::ZERO)]])
        // Full coverage still writes a ledger entry
        .append_query_results(vec![vec![link(
            "production_order",
            mo_id,
            "stock_reservation",
            Uuid::nil(),
            Uuid::nil(),
        )]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, _rx) = service(db);

    let outcome = service.on_production_order_started(mo_id).await.unwrap();
    assert_matches!(outcome, RequisitionOutcome::MaterialsAvailable);
}

#[tokio::test]
async fn covered_components_are_not_reserved_again_on_restart() {
    let mo_id = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![in_progress_mo(mo_id, Uuid::new_v4(), Uuid::new_v4())]])
        .append_query_results(vec![vec![link(
            "production_order",
            mo_id,
            "stock_reservation",
            Uuid::nil(),
            Uuid::nil(),
        )]])
        .into_connection();
    let (service, _rx) = service(db);

    let outcome = service.on_production_order_started(mo_id).await.unwrap();
    assert_matches!(outcome, RequisitionOutcome::MaterialsAvailable);
}
