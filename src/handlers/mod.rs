pub mod approval_rules;
pub mod common;
pub mod documents;
pub mod goods_receipts;
pub mod health;
pub mod invoices;
pub mod production_orders;
pub mod quotations;
pub mod sales_orders;
