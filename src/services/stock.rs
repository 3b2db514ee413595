//! Stock level bookkeeping. Available quantity is always derived as
//! quantity - reserved_quantity; reservations never exceed on-hand stock.

use crate::{
    db::DbPool,
    entities::stock_level::{self, Entity as StockLevelEntity},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Loads the stock row for an item in a warehouse, if any. Usable inside an
/// open transaction.
pub async fn fetch_level<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    warehouse: &str,
) -> Result<Option<stock_level::Model>, ServiceError> {
    StockLevelEntity::find()
        .filter(stock_level::Column::ItemId.eq(item_id))
        .filter(stock_level::Column::Warehouse.eq(warehouse))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Available quantity for an item; zero when no stock row exists.
pub async fn available<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    warehouse: &str,
) -> Result<Decimal, ServiceError> {
    Ok(fetch_level(conn, item_id, warehouse)
        .await?
        .map(|level| level.available())
        .unwrap_or(Decimal::ZERO))
}

/// Availability per item for a set of items.
pub async fn available_map<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
    warehouse: &str,
) -> Result<HashMap<Uuid, Decimal>, ServiceError> {
    let levels = StockLevelEntity::find()
        .filter(stock_level::Column::ItemId.is_in(item_ids.iter().copied()))
        .filter(stock_level::Column::Warehouse.eq(warehouse))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(levels
        .into_iter()
        .map(|level| (level.item_id, level.available()))
        .collect())
}

/// Increases the reservation on a stock row. Availability is re-checked in
/// the UPDATE's WHERE clause, so two concurrent reservations cannot both
/// pass on a stale read; the loser affects zero rows and gets
/// `InsufficientStock`.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    warehouse: &str,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    if quantity <= Decimal::ZERO {
        return Ok(());
    }

    let result = StockLevelEntity::update_many()
        .col_expr(
            stock_level::Column::ReservedQuantity,
            Expr::col(stock_level::Column::ReservedQuantity).add(quantity),
        )
        .col_expr(stock_level::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(stock_level::Column::ItemId.eq(item_id))
        .filter(stock_level::Column::Warehouse.eq(warehouse))
        .filter(
            Expr::col(stock_level::Column::Quantity)
                .sub(Expr::col(stock_level::Column::ReservedQuantity))
                .gte(quantity),
        )
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "cannot reserve {} of item {} in warehouse {}",
            quantity, item_id, warehouse
        )));
    }

    Ok(())
}

/// Lowers the reservation on a stock row, clamped at zero. Releasing against
/// a missing row is a no-op.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    warehouse: &str,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    if quantity <= Decimal::ZERO {
        return Ok(());
    }

    let Some(level) = fetch_level(conn, item_id, warehouse).await? else {
        return Ok(());
    };

    let new_reserved = (level.reserved_quantity - quantity).max(Decimal::ZERO);
    let mut active = level.into_active_model();
    active.reserved_quantity = Set(new_reserved);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)?;

    Ok(())
}

/// Adds received quantity to a stock row, creating it when absent.
pub async fn add_stock<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    warehouse: &str,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    match fetch_level(conn, item_id, warehouse).await? {
        Some(level) => {
            let on_hand = level.quantity;
            let mut active = level.into_active_model();
            active.quantity = Set(on_hand + quantity);
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        None => {
            let model = stock_level::ActiveModel {
                id: Set(Uuid::new_v4()),
                item_id: Set(item_id),
                warehouse: Set(warehouse.to_string()),
                quantity: Set(quantity),
                reserved_quantity: Set(Decimal::ZERO),
                created_at: Set(now),
                updated_at: Set(now),
            };
            model.insert(conn).await.map_err(ServiceError::db_error)?;
        }
    }
    Ok(())
}

/// Service facade over the stock helpers for handler-level queries and
/// manual adjustments.
#[derive(Clone)]
pub struct StockService {
    db_pool: Arc<DbPool>,
}

impl StockService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn available(&self, item_id: Uuid, warehouse: &str) -> Result<Decimal, ServiceError> {
        available(self.db_pool.as_ref(), item_id, warehouse).await
    }

    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        item_id: Uuid,
        warehouse: &str,
        delta: Decimal,
    ) -> Result<Decimal, ServiceError> {
        add_stock(self.db_pool.as_ref(), item_id, warehouse, delta).await?;
        available(self.db_pool.as_ref(), item_id, warehouse).await
    }

    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        item_id: Uuid,
        warehouse: &str,
        quantity: Decimal,
    ) -> Result<(), ServiceError> {
        reserve(self.db_pool.as_ref(), item_id, warehouse, quantity).await
    }

    #[instrument(skip(self))]
    pub async fn release(
        &self,
        item_id: Uuid,
        warehouse: &str,
        quantity: Decimal,
    ) -> Result<(), ServiceError> {
        release(self.db_pool.as_ref(), item_id, warehouse, quantity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn level(quantity: Decimal, reserved: Decimal) -> stock_level::Model {
        stock_level::Model {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            warehouse: "MAIN".to_string(),
            quantity,
            reserved_quantity: reserved,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reserve_succeeds_when_the_guard_matches_a_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        reserve(&db, Uuid::new_v4(), "MAIN", dec!(5)).await.unwrap();
    }

    #[tokio::test]
    async fn losing_the_reservation_guard_is_insufficient_stock() {
        // Zero rows affected: the row is gone or a concurrent reservation
        // already consumed the availability
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let err = reserve(&db, Uuid::new_v4(), "MAIN", dec!(5)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[tokio::test]
    async fn reserve_of_zero_is_a_no_op() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        reserve(&db, Uuid::new_v4(), "MAIN", dec!(0)).await.unwrap();
    }

    #[tokio::test]
    async fn release_clamps_the_reservation_at_zero() {
        let row = level(dec!(10), dec!(3));
        let item_id = row.item_id;
        let mut updated = row.clone();
        updated.reserved_quantity = dec!(0);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![row]])
            .append_query_results(vec![vec![updated]])
            .into_connection();

        release(&db, item_id, "MAIN", dec!(5)).await.unwrap();
    }

    #[tokio::test]
    async fn release_against_a_missing_row_is_a_no_op() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<stock_level::Model>::new()])
            .into_connection();

        release(&db, Uuid::new_v4(), "MAIN", dec!(2)).await.unwrap();
    }
}
