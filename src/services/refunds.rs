use crate::{
    db::DbPool,
    entities::{
        order::{self, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        refund::{self, Entity as RefundEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{inventory::InventoryService, orders, orders::OrderResponse, pricing},
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref REFUND_CREATIONS: IntCounter = IntCounter::new(
        "pos_refund_creations_total",
        "Total number of refunds created"
    )
    .expect("metric can be created");
    static ref REFUND_CREATION_FAILURES: IntCounter = IntCounter::new(
        "pos_refund_creation_failures_total",
        "Total number of failed refund creations"
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub trx_number: String,
    pub reason: String,
    /// Cashier performing the refund, supplied by the auth layer
    pub refunded_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub trx_number: String,
    pub reason: String,
    pub refunded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<refund::Model> for RefundResponse {
    fn from(model: refund::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            trx_number: model.trx_number,
            reason: model.reason,
            refunded_by: model.refunded_by,
            created_at: model.created_at,
        }
    }
}

/// Service for reversing completed orders
#[derive(Clone)]
pub struct RefundService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl RefundService {
    /// Creates a new refund service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Refunds a completed order: credits stock for every line item, marks
    /// the order `refunded`, and records the reason, all in one transaction.
    ///
    /// Only `completed` orders are eligible. A pending transfer order must
    /// be settled first, and an already-refunded order fails without any
    /// further stock change.
    #[instrument(skip(self, request), fields(trx_number = %request.trx_number))]
    pub async fn create_refund(
        &self,
        request: CreateRefundRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let result = self.create_refund_inner(&request).await;
        match &result {
            Ok(_) => REFUND_CREATIONS.inc(),
            Err(_) => REFUND_CREATION_FAILURES.inc(),
        }
        result
    }

    async fn create_refund_inner(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<OrderResponse, ServiceError> {
        pricing::validate_create_refund(request)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let order = orders::find_by_trx_number(&txn, &request.trx_number).await?;
        match order.status {
            OrderStatus::Completed => {}
            OrderStatus::Refunded => {
                return Err(ServiceError::InvalidState(format!(
                    "order {} is already refunded",
                    request.trx_number
                )));
            }
            OrderStatus::Pending => {
                return Err(ServiceError::InvalidState(format!(
                    "order {} is pending settlement and cannot be refunded",
                    request.trx_number
                )));
            }
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;

        // Mirror of the reservation pass in order creation
        for item in &items {
            InventoryService::release(&txn, item.product_id, item.quantity).await?;
        }

        let now = Utc::now();
        let order_id = order.id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Refunded);
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        let refund_row = refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            trx_number: Set(request.trx_number.clone()),
            reason: Set(request.reason.clone()),
            refunded_by: Set(request.refunded_by),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            refund_id = %refund_row.id,
            item_count = items.len(),
            "Order refunded successfully"
        );
        if let Some(event_sender) = &self.event_sender {
            let event = Event::OrderRefunded {
                order_id,
                refund_id: refund_row.id,
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order refunded event");
            }
        }

        Ok(OrderResponse::from(updated))
    }

    /// Retrieves the refund recorded for an order, if any
    #[instrument(skip(self))]
    pub async fn get_refund_for_order(
        &self,
        trx_number: &str,
    ) -> Result<Option<RefundResponse>, ServiceError> {
        let db = &*self.db_pool;

        let found = RefundEntity::find()
            .filter(refund::Column::TrxNumber.eq(trx_number))
            .one(db)
            .await?;

        Ok(found.map(RefundResponse::from))
    }
}
