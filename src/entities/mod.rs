pub mod approval_rule;
pub mod bom;
pub mod bom_component;
pub mod cascade_link;
pub mod goods_receipt;
pub mod goods_receipt_line;
pub mod invoice;
pub mod invoice_line;
pub mod production_order;
pub mod purchase_order;
pub mod purchase_order_line;
pub mod purchase_requisition;
pub mod purchase_requisition_line;
pub mod quotation;
pub mod quotation_line;
pub mod sales_order;
pub mod sales_order_line;
pub mod status_log;
pub mod stock_level;
