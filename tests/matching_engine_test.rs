//! Service-level tests for the invoice matching engine.
//!
//! Tests cover:
//! - Reference validation against the purchase order
//! - Hold routing with a composed hold reason
//! - Administrative override of held invoices

use assert_matches::assert_matches;
use chrono::Utc;
use fabriq_api::{
    auth::RequesterContext,
    config::MatchingConfig,
    entities::{goods_receipt, invoice, invoice_line, purchase_order, purchase_order_line, status_log},
    errors::ServiceError,
    events::{Event, EventSender},
    services::invoice_matching::{CreateInvoiceInput, InvoiceLineInput, InvoiceMatchingService},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn event_channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(16);
    (EventSender::new(tx), rx)
}

fn service(db: DatabaseConnection) -> (InvoiceMatchingService, mpsc::Receiver<Event>) {
    let (sender, rx) = event_channel();
    (
        InvoiceMatchingService::new(Arc::new(db), sender, MatchingConfig::default()),
        rx,
    )
}

fn admin_ctx() -> RequesterContext {
    RequesterContext {
        role: Some("Admin".to_string()),
        has_admin_capability: true,
    }
}

fn clerk_ctx() -> RequesterContext {
    RequesterContext {
        role: Some("ap_clerk".to_string()),
        has_admin_capability: false,
    }
}

fn approved_po(id: Uuid, total: Decimal) -> purchase_order::Model {
    purchase_order::Model {
        id,
        po_number: "PO-0001".to_string(),
        quotation_id: None,
        supplier_id: Uuid::new_v4(),
        status: "approved".to_string(),
        total_amount: total,
        current_level: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn po_line(po_id: Uuid, item_id: Uuid, quantity: Decimal, rate: Decimal) -> purchase_order_line::Model {
    purchase_order_line::Model {
        id: Uuid::new_v4(),
        purchase_order_id: po_id,
        item_id,
        quantity,
        rate,
        amount: quantity * rate,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn held_invoice(id: Uuid, po_id: Uuid) -> invoice::Model {
    invoice::Model {
        id,
        invoice_number: "INV-1".to_string(),
        purchase_order_id: po_id,
        supplier_id: Uuid::new_v4(),
        status: "hold".to_string(),
        total_amount: dec!(1050),
        hold_reason: Some("rate deviation".to_string()),
        quotation_match: "not_applicable".to_string(),
        po_match: "mismatched".to_string(),
        grn_match: "not_applicable".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn transition_row(document_id: Uuid) -> status_log::Model {
    status_log::Model {
        id: Uuid::new_v4(),
        document_type: "invoice".to_string(),
        document_id,
        from_status: "draft".to_string(),
        to_status: "hold".to_string(),
        reason: None,
        occurred_at: Utc::now(),
    }
}

#[tokio::test]
async fn invoice_against_unknown_po_is_rejected() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![Vec::<purchase_order::Model>::new()])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service
        .match_and_create_invoice(CreateInvoiceInput {
            invoice_number: None,
            purchase_order_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            total_amount: dec!(1000),
            lines: vec![],
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidReference(_));
}

#[tokio::test]
async fn invoice_against_unapproved_po_is_rejected() {
    let po_id = Uuid::new_v4();
    let mut po = approved_po(po_id, dec!(1000));
    po.status = "pending_approval".to_string();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![po]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service
        .match_and_create_invoice(CreateInvoiceInput {
            invoice_number: None,
            purchase_order_id: po_id,
            supplier_id: Uuid::new_v4(),
            total_amount: dec!(1000),
            lines: vec![],
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidReference(msg) => {
        assert!(msg.contains("not approved"));
    });
}

#[tokio::test]
async fn rate_deviation_puts_the_invoice_on_hold() {
    let po_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let invoice_id = Uuid::new_v4();

    let created = invoice::Model {
        id: invoice_id,
        total_amount: dec!(1050),
        purchase_order_id: po_id,
        ..held_invoice(invoice_id, po_id)
    };
    let line_row = invoice_line::Model {
        id: Uuid::new_v4(),
        invoice_id,
        item_id,
        quantity: dec!(10),
        rate: dec!(105),
        amount: dec!(1050),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![approved_po(po_id, dec!(1000))]])
        .append_query_results(vec![vec![po_line(po_id, item_id, dec!(10), dec!(100))]])
        // No GRN rows at all for this PO
        .append_query_results(vec![Vec::<goods_receipt::Model>::new()])
        .append_query_results(vec![vec![created]])
        .append_query_results(vec![vec![line_row]])
        .append_query_results(vec![vec![transition_row(invoice_id)]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            3
        ])
        .into_connection();
    let (service, mut rx) = service(db);

    let result = service
        .match_and_create_invoice(CreateInvoiceInput {
            invoice_number: Some("INV-1".to_string()),
            purchase_order_id: po_id,
            supplier_id: Uuid::new_v4(),
            total_amount: dec!(1050),
            lines: vec![InvoiceLineInput {
                item_id,
                quantity: dec!(10),
                rate: dec!(105),
            }],
        })
        .await
        .unwrap();

    assert_eq!(result.status, "hold");

    // The hold event carries the composed reason from the evaluation,
    // not the persisted row. The service mints its own invoice id, so the
    // event is matched on the purchase order it references.
    let event = rx.try_recv().expect("a hold event must be emitted");
    assert_matches!(event, Event::InvoiceHeld { purchase_order_id, hold_reason, .. } => {
        assert_eq!(purchase_order_id, po_id);
        assert!(hold_reason.contains("PO rate"));
    });
}

#[tokio::test]
async fn admin_override_requires_the_capability() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let (service, _rx) = service(db);

    let err = service
        .admin_approve(Uuid::new_v4(), "supplier invoice verified", &clerk_ctx())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn admin_override_requires_a_reason() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let (service, _rx) = service(db);

    let err = service
        .admin_approve(Uuid::new_v4(), "   ", &admin_ctx())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn admin_override_only_applies_to_held_invoices() {
    let invoice_id = Uuid::new_v4();
    let mut already_approved = held_invoice(invoice_id, Uuid::new_v4());
    already_approved.status = "approved".to_string();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![already_approved]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service
        .admin_approve(invoice_id, "already cleared", &admin_ctx())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn admin_override_clears_the_hold_and_records_the_reason() {
    let invoice_id = Uuid::new_v4();
    let po_id = Uuid::new_v4();
    let held = held_invoice(invoice_id, po_id);
    let mut cleared = held.clone();
    cleared.status = "approved".to_string();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![held]])
        .append_query_results(vec![vec![transition_row(invoice_id)]])
        .append_query_results(vec![vec![cleared]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, mut rx) = service(db);

    let result = service
        .admin_approve(invoice_id, "supplier rate list updated", &admin_ctx())
        .await
        .unwrap();

    assert_eq!(result.status, "approved");

    let event = rx.try_recv().expect("an override event must be emitted");
    assert_matches!(event, Event::InvoiceAdminApproved { invoice_id: cleared_id, reason, approved_by_role } => {
        assert_eq!(cleared_id, invoice_id);
        assert_eq!(reason, "supplier rate list updated");
        assert_eq!(approved_by_role, "Admin");
    });
}

#[tokio::test]
async fn concurrent_override_affects_zero_rows_and_fails() {
    let invoice_id = Uuid::new_v4();
    let held = held_invoice(invoice_id, Uuid::new_v4());

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![held]])
        .append_exec_results(vec![MockExecResult {
            last_insert_id: 0,
            rows_affected: 0,
        }])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service
        .admin_approve(invoice_id, "second admin racing", &admin_ctx())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ConcurrentModification(id) => assert_eq!(id, invoice_id));
}

#[tokio::test]
async fn get_invoice_returns_none_when_absent() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![Vec::<invoice::Model>::new()])
        .into_connection();
    let (service, _rx) = service(db);

    assert!(service.get_invoice(Uuid::new_v4()).await.unwrap().is_none());
}
