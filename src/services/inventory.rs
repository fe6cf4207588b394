//! Inventory ledger over `products.stock_quantity`.
//!
//! `reserve` and `release` take the caller's connection so they participate
//! in the same transaction as the order or refund writes they accompany; a
//! stock mutation must never commit without its order-side counterpart.

use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Service for stock debits and credits
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
}

impl InventoryService {
    /// Creates a new inventory service instance
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Atomically decrements available stock by `quantity` if and only if
    /// current stock covers it. The check and the decrement are one
    /// conditional UPDATE, so two concurrent reservations cannot both
    /// succeed against the same units.
    pub async fn reserve<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let available = ProductEntity::find_by_id(product_id)
                .one(conn)
                .await?
                .map(|p| p.stock_quantity)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("product {} not found", product_id))
                })?;
            return Err(ServiceError::InsufficientStock {
                product_id,
                requested: quantity,
                available,
            });
        }

        debug!(product_id = %product_id, quantity, "stock reserved");
        Ok(())
    }

    /// Atomically increments stock by `quantity`. Used by refund reversal;
    /// no upper bound is enforced.
    pub async fn release<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "product {} not found",
                product_id
            )));
        }

        debug!(product_id = %product_id, quantity, "stock released");
        Ok(())
    }

    /// Current stock for a product.
    #[instrument(skip(self))]
    pub async fn stock_level(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let db = &*self.db_pool;

        ProductEntity::find_by_id(product_id)
            .one(db)
            .await?
            .map(|p| p.stock_quantity)
            .ok_or_else(|| ServiceError::NotFound(format!("product {} not found", product_id)))
    }
}
