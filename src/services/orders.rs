use crate::{
    db::DbPool,
    entities::{
        customer,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentMethod},
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{inventory::InventoryService, pricing},
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref ORDER_CREATIONS: IntCounter =
        IntCounter::new("pos_order_creations_total", "Total number of orders created")
            .expect("metric can be created");
    static ref ORDER_CREATION_FAILURES: IntCounter = IntCounter::new(
        "pos_order_creation_failures_total",
        "Total number of failed order creations"
    )
    .expect("metric can be created");
}

/// Attempts at allocating a unique transaction number before giving up.
const TRX_NUMBER_ATTEMPTS: usize = 3;

/// Customer mode of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Customer data captured inline; a customer record is created with the order
    New,
    /// Walk-in sale identified only by a display name
    Guest,
    /// Existing customer referenced by id
    Member,
}

/// Inline customer details for `new` orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Cashier identity, supplied by the auth layer rather than the client
    pub cashier_id: Uuid,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub customer: CustomerInfo,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub guest_name: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub items: Vec<CreateOrderItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub trx_number: String,
    pub cashier_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
}

impl From<OrderModel> for OrderResponse {
    fn from(model: OrderModel) -> Self {
        Self {
            id: model.id,
            trx_number: model.trx_number,
            cashier_id: model.cashier_id,
            customer_id: model.customer_id,
            total_amount: model.total_amount,
            payment_method: model.payment_method,
            status: model.status,
            order_date: model.order_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    /// Name snapshot taken at sale time; survives later catalog changes
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(model: order_item::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            product_name: model.product_name,
            quantity: model.quantity,
            unit_price: model.unit_price,
            total_price: model.total_price,
            created_by: model.created_by,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for creating and querying orders
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an order: validates the request, prices its lines, debits
    /// stock, and persists the header and item rows in one transaction.
    ///
    /// Initial status follows the payment method: cash and qris settle at
    /// the till and start `completed`; transfer starts `pending` until
    /// [`settle_order`](Self::settle_order) confirms payment.
    #[instrument(skip(self, request), fields(cashier_id = %request.cashier_id, order_type = ?request.order_type))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let result = self.create_order_inner(&request).await;
        match &result {
            Ok(_) => ORDER_CREATIONS.inc(),
            Err(_) => ORDER_CREATION_FAILURES.inc(),
        }
        result
    }

    async fn create_order_inner(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        pricing::validate_create_order(request)?;

        // Unique index on trx_number turns a collision into a constraint
        // violation; the whole transaction is retried with a fresh number.
        for attempt in 1..=TRX_NUMBER_ATTEMPTS {
            let trx_number = generate_trx_number();
            match self.create_order_txn(request, &trx_number).await {
                Ok(order) => {
                    info!(
                        order_id = %order.id,
                        trx_number = %order.trx_number,
                        total_amount = %order.total_amount,
                        status = %order.status,
                        "Order created successfully"
                    );
                    if let Some(event_sender) = &self.event_sender {
                        if let Err(e) = event_sender.send(Event::OrderCreated(order.id)).await {
                            warn!(error = %e, order_id = %order.id, "Failed to send order created event");
                        }
                    }
                    return Ok(OrderResponse::from(order));
                }
                Err(e) if e.is_unique_violation() => {
                    warn!(
                        attempt,
                        trx_number = %trx_number,
                        "Transaction number collision, regenerating"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::Conflict(
            "could not allocate a unique transaction number".to_string(),
        ))
    }

    /// The atomic unit: customer resolution, pricing, stock debits, and the
    /// order/item inserts. Any failure rolls the whole transaction back, so
    /// a partially priced or partially reserved order leaves no trace.
    async fn create_order_txn(
        &self,
        request: &CreateOrderRequest,
        trx_number: &str,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let customer_id = resolve_customer(&txn, request).await?;
        let priced = pricing::price_items(&txn, &request.items).await?;

        // Reservation order follows request order; the first shortfall
        // fails the whole request.
        for line in &priced.lines {
            InventoryService::reserve(&txn, line.product_id, line.quantity).await?;
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let guest_name = match request.order_type {
            OrderType::Guest => request.guest_name.clone(),
            _ => None,
        };

        let order = order::ActiveModel {
            id: Set(order_id),
            trx_number: Set(trx_number.to_string()),
            cashier_id: Set(request.cashier_id),
            customer_id: Set(customer_id),
            guest_name: Set(guest_name),
            total_amount: Set(priced.total_amount),
            payment_method: Set(request.payment_method),
            status: Set(request.payment_method.initial_status()),
            order_date: Set(now),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        };
        let order = order.insert(&txn).await?;

        for line in priced.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.total_price),
                created_by: Set(request.cashier_id),
                created_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        txn.commit().await?;
        Ok(order)
    }

    /// Confirms payment for a pending transfer order, moving it to
    /// `completed`. Any other current status is rejected.
    #[instrument(skip(self))]
    pub async fn settle_order(&self, trx_number: &str) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let order = find_by_trx_number(&txn, trx_number).await?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "order {} is {}, only pending orders can be settled",
                trx_number, order.status
            )));
        }

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Completed);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %updated.id, trx_number = %trx_number, "Order settled");
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderSettled(updated.id)).await {
                warn!(error = %e, order_id = %updated.id, "Failed to send order settled event");
            }
        }

        Ok(OrderResponse::from(updated))
    }

    /// Retrieves an order by transaction number
    #[instrument(skip(self))]
    pub async fn get_order(&self, trx_number: &str) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let order = find_by_trx_number(db, trx_number).await?;
        Ok(OrderResponse::from(order))
    }

    /// Retrieves the line items of an order by transaction number
    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        trx_number: &str,
    ) -> Result<Vec<OrderItemResponse>, ServiceError> {
        let db = &*self.db_pool;
        let order = find_by_trx_number(db, trx_number).await?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(db)
            .await?;

        Ok(items.into_iter().map(OrderItemResponse::from).collect())
    }

    /// Lists orders with pagination, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(OrderResponse::from).collect(),
            total,
            page,
            per_page,
        })
    }
}

/// Looks up an order by its transaction number on any connection, so the
/// refund engine can reuse it inside its own transaction.
pub(crate) async fn find_by_trx_number<C: ConnectionTrait>(
    conn: &C,
    trx_number: &str,
) -> Result<OrderModel, ServiceError> {
    OrderEntity::find()
        .filter(order::Column::TrxNumber.eq(trx_number))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", trx_number)))
}

async fn resolve_customer(
    txn: &DatabaseTransaction,
    request: &CreateOrderRequest,
) -> Result<Option<Uuid>, ServiceError> {
    match request.order_type {
        OrderType::Member => {
            let id = request.customer_id.ok_or_else(|| {
                ServiceError::validation("customer_id", "customer id is required for member orders")
            })?;
            customer::Entity::find_by_id(id)
                .one(txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("customer {} not found", id)))?;
            Ok(Some(id))
        }
        OrderType::New => {
            let created = customer::ActiveModel {
                id: Set(Uuid::new_v4()),
                name: Set(request.customer.name.clone().unwrap_or_default()),
                email: Set(request.customer.email.clone()),
                phone: Set(request.customer.phone.clone()),
                created_at: Set(Utc::now()),
            }
            .insert(txn)
            .await?;
            Ok(Some(created.id))
        }
        OrderType::Guest => Ok(None),
    }
}

fn generate_trx_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("TRX-{}-{:06}", Utc::now().format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trx_numbers_carry_date_and_padded_suffix() {
        let trx = generate_trx_number();
        let parts: Vec<&str> = trx.split('-').collect();

        assert_eq!(parts[0], "TRX");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn initial_status_follows_payment_method() {
        assert_eq!(PaymentMethod::Cash.initial_status(), OrderStatus::Completed);
        assert_eq!(PaymentMethod::Qris.initial_status(), OrderStatus::Completed);
        assert_eq!(
            PaymentMethod::Transfer.initial_status(),
            OrderStatus::Pending
        );
    }

    #[test]
    fn model_converts_to_response() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let cashier_id = Uuid::new_v4();

        let model = OrderModel {
            id: order_id,
            trx_number: "TRX-20240101-000042".to_string(),
            cashier_id,
            customer_id: None,
            guest_name: Some("walk-in".to_string()),
            total_amount: dec!(99.99),
            payment_method: PaymentMethod::Cash,
            status: OrderStatus::Completed,
            order_date: now,
            created_at: now,
            updated_at: None,
            version: 1,
        };

        let response = OrderResponse::from(model);
        assert_eq!(response.id, order_id);
        assert_eq!(response.cashier_id, cashier_id);
        assert_eq!(response.trx_number, "TRX-20240101-000042");
        assert_eq!(response.total_amount, dec!(99.99));
        assert_eq!(response.status, OrderStatus::Completed);
    }
}
