pub mod approval_rules;
pub mod approvals;
pub mod audit;
pub mod cascade;
pub mod goods_receipts;
pub mod invoice_matching;
pub mod production_orders;
pub mod quotations;
pub mod sales_orders;
pub mod stock;

use crate::{config::AppConfig, db::DbPool, events::EventSender};
use std::sync::Arc;

/// Container wiring every service once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub invoices: Arc<invoice_matching::InvoiceMatchingService>,
    pub approval_rules: Arc<approval_rules::ApprovalRuleService>,
    pub approvals: Arc<approvals::ApprovalService>,
    pub quotations: Arc<quotations::QuotationService>,
    pub goods_receipts: Arc<goods_receipts::GoodsReceiptService>,
    pub sales_orders: Arc<sales_orders::SalesOrderService>,
    pub production_orders: Arc<production_orders::ProductionOrderService>,
    pub cascade: Arc<cascade::CascadeService>,
    pub stock: Arc<stock::StockService>,
}

impl AppServices {
    pub fn build(db: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        let stock = Arc::new(stock::StockService::new(db.clone()));
        let approvals = Arc::new(approvals::ApprovalService::new(
            db.clone(),
            event_sender.clone(),
        ));

        Self {
            invoices: Arc::new(invoice_matching::InvoiceMatchingService::new(
                db.clone(),
                event_sender.clone(),
                config.matching.clone(),
            )),
            approval_rules: Arc::new(approval_rules::ApprovalRuleService::new(db.clone())),
            quotations: Arc::new(quotations::QuotationService::new(
                db.clone(),
                event_sender.clone(),
            )),
            goods_receipts: Arc::new(goods_receipts::GoodsReceiptService::new(
                db.clone(),
                event_sender.clone(),
            )),
            sales_orders: Arc::new(sales_orders::SalesOrderService::new(
                db.clone(),
                event_sender.clone(),
            )),
            production_orders: Arc::new(production_orders::ProductionOrderService::new(
                db.clone(),
                event_sender.clone(),
            )),
            cascade: Arc::new(cascade::CascadeService::new(
                db,
                event_sender,
                approvals.clone(),
                config.cascade.clone(),
            )),
            approvals,
            stock,
        }
    }
}
