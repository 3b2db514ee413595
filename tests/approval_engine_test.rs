//! Service-level tests for the approval engine.
//!
//! Tests cover:
//! - Amount-banded chain resolution and overlap detection
//! - Role enforcement while advancing and rejecting
//! - Guarded updates under concurrent approvers

use assert_matches::assert_matches;
use chrono::Utc;
use fabriq_api::{
    entities::{
        approval_rule::{self, ApprovalDocumentType},
        purchase_order, purchase_requisition, status_log,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::approvals::ApprovalService,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn service(db: DatabaseConnection) -> (ApprovalService, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(16);
    (ApprovalService::new(Arc::new(db), EventSender::new(tx)), rx)
}

fn rule(
    document_type: ApprovalDocumentType,
    level: i32,
    role: &str,
    min: Option<Decimal>,
    max: Option<Decimal>,
) -> approval_rule::Model {
    approval_rule::Model {
        id: Uuid::new_v4(),
        document_type: document_type.as_str().to_string(),
        approval_level: level,
        role_name: role.to_string(),
        min_amount: min,
        max_amount: max,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn requisition(id: Uuid, status: &str, level: i32, value: Decimal) -> purchase_requisition::Model {
    purchase_requisition::Model {
        id,
        pr_number: "PR-0001".to_string(),
        department: "production".to_string(),
        status: status.to_string(),
        current_level: level,
        estimated_value: value,
        source_type: None,
        source_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn pending_po(id: Uuid, level: i32, total: Decimal) -> purchase_order::Model {
    purchase_order::Model {
        id,
        po_number: "PO-0001".to_string(),
        quotation_id: None,
        supplier_id: Uuid::new_v4(),
        status: "pending_approval".to_string(),
        total_amount: total,
        current_level: level,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn transition_row(document_id: Uuid) -> status_log::Model {
    status_log::Model {
        id: Uuid::new_v4(),
        document_type: "purchase_requisition".to_string(),
        document_id,
        from_status: "submitted".to_string(),
        to_status: "approved".to_string(),
        reason: None,
        occurred_at: Utc::now(),
    }
}

#[tokio::test]
async fn resolve_chain_orders_matching_bands_by_level() {
    let doc = ApprovalDocumentType::PurchaseOrder;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![
            rule(doc, 2, "Director", Some(dec!(100001)), None),
            rule(doc, 1, "Manager", Some(dec!(0)), Some(dec!(100000))),
        ]])
        .into_connection();
    let (service, _rx) = service(db);

    // 250,000 sits in the Director band but still climbs the Manager rung
    let chain = service.resolve_chain(doc, dec!(250000)).await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].level, 1);
    assert_eq!(chain[0].role_name, "Manager");
    assert_eq!(chain[1].level, 2);
    assert_eq!(chain[1].role_name, "Director");
}

#[tokio::test]
async fn overlapping_bands_surface_as_configuration_error() {
    let doc = ApprovalDocumentType::PurchaseOrder;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![
            rule(doc, 1, "Manager", Some(dec!(0)), None),
            rule(doc, 1, "Supervisor", Some(dec!(0)), Some(dec!(50000))),
        ]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.resolve_chain(doc, dec!(100)).await.unwrap_err();
    assert_matches!(err, ServiceError::AmbiguousApprovalConfig(msg) => {
        assert!(msg.contains("level 1"));
    });
}

#[tokio::test]
async fn submit_rejects_documents_not_in_a_submittable_status() {
    let pr_id = Uuid::new_v4();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![requisition(pr_id, "submitted", 0, dec!(5000))]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service
        .submit(ApprovalDocumentType::PurchaseRequisition, pr_id)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn submit_with_empty_chain_auto_approves() {
    let pr_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseRequisition;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![requisition(pr_id, "draft", 0, dec!(500))]])
        // Only rule starts above this requisition's value
        .append_query_results(vec![vec![rule(doc, 1, "Manager", Some(dec!(10000)), None)]])
        .append_query_results(vec![vec![transition_row(pr_id)]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, mut rx) = service(db);

    let outcome = service.submit(doc, pr_id).await.unwrap();
    assert!(outcome.auto_approved);
    assert!(outcome.chain.is_empty());
    assert_eq!(outcome.status, "approved");

    let event = rx.try_recv().expect("auto-approval must be announced");
    assert_matches!(event, Event::DocumentAutoApproved { document_id, .. } => {
        assert_eq!(document_id, pr_id);
    });
}

#[tokio::test]
async fn advance_rejects_a_role_that_does_not_own_the_next_level() {
    let pr_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseRequisition;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![requisition(pr_id, "submitted", 0, dec!(250000))]])
        .append_query_results(vec![vec![
            rule(doc, 1, "Manager", None, None),
            rule(doc, 2, "Director", Some(dec!(100001)), None),
        ]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.advance(doc, pr_id, "Director").await.unwrap_err();
    assert_matches!(err, ServiceError::WrongApprover { expected, got } => {
        assert_eq!(expected, "Manager");
        assert_eq!(got, "Director");
    });
}

#[tokio::test]
async fn advancing_past_the_final_level_is_invalid() {
    let pr_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseRequisition;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![requisition(pr_id, "submitted", 1, dec!(5000))]])
        .append_query_results(vec![vec![rule(doc, 1, "Manager", None, None)]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.advance(doc, pr_id, "Manager").await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn final_advance_approves_the_document() {
    let pr_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseRequisition;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![requisition(pr_id, "submitted", 0, dec!(5000))]])
        .append_query_results(vec![vec![rule(doc, 1, "Manager", None, None)]])
        .append_query_results(vec![vec![transition_row(pr_id)]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, mut rx) = service(db);

    let outcome = service.advance(doc, pr_id, "Manager").await.unwrap();
    assert_eq!(outcome.new_level, 1);
    assert!(outcome.is_final);
    assert_eq!(outcome.status, "approved");

    let event = rx.try_recv().expect("the advance must be announced");
    assert_matches!(event, Event::ApprovalAdvanced { document_id, level, is_final, .. } => {
        assert_eq!(document_id, pr_id);
        assert_eq!(level, 1);
        assert!(is_final);
    });
}

#[tokio::test]
async fn stale_approver_loses_the_guarded_update() {
    let pr_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseRequisition;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![requisition(pr_id, "submitted", 0, dec!(5000))]])
        .append_query_results(vec![vec![rule(doc, 1, "Manager", None, None)]])
        .append_exec_results(vec![MockExecResult {
            last_insert_id: 0,
            rows_affected: 0,
        }])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service.advance(doc, pr_id, "Manager").await.unwrap_err();
    assert_matches!(err, ServiceError::ConcurrentModification(id) => assert_eq!(id, pr_id));
}

#[tokio::test]
async fn reject_requires_the_pending_level_role() {
    let po_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseOrder;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![pending_po(po_id, 0, dec!(40000))]])
        .append_query_results(vec![vec![rule(doc, 1, "Manager", None, None)]])
        .into_connection();
    let (service, _rx) = service(db);

    let err = service
        .reject(doc, po_id, "Director", Some("budget freeze".to_string()))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::WrongApprover { expected, .. } => {
        assert_eq!(expected, "Manager");
    });
}

#[tokio::test]
async fn reject_is_terminal_and_announced() {
    let po_id = Uuid::new_v4();
    let doc = ApprovalDocumentType::PurchaseOrder;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![pending_po(po_id, 0, dec!(40000))]])
        .append_query_results(vec![vec![rule(doc, 1, "Manager", None, None)]])
        .append_query_results(vec![vec![transition_row(po_id)]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let (service, mut rx) = service(db);

    service
        .reject(doc, po_id, "Manager", Some("budget freeze".to_string()))
        .await
        .unwrap();

    let event = rx.try_recv().expect("the rejection must be announced");
    assert_matches!(event, Event::ApprovalRejected { document_id, role, reason, .. } => {
        assert_eq!(document_id, po_id);
        assert_eq!(role, "Manager");
        assert_eq!(reason.as_deref(), Some("budget freeze"));
    });
}
