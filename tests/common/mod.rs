use chrono::Utc;
use pos_api::{
    config::AppConfig,
    db,
    entities::{customer, product, PaymentMethod},
    events,
    services::orders::{CreateOrderItemRequest, CreateOrderRequest, CustomerInfo, OrderType},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Helper harness backed by a file-based SQLite database with a single
/// pooled connection, so concurrent service calls contend for the same
/// store the way they would against one Postgres instance.
pub struct TestApp {
    pub state: AppState,
    pub cashier_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let db_path = tmp.path().join("pos_test.db");

        let mut config = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test",
        );
        config.auto_migrate = true;
        config.db_max_connections = 1;
        config.db_min_connections = 1;

        let pool = db::establish_connection(&config)
            .await
            .expect("connect and migrate");

        let (event_sender, receiver) = events::event_channel(64);
        let event_task = events::spawn_event_logger(receiver);

        let state = AppState::new(Arc::new(pool), config, event_sender);
        Self {
            state,
            cashier_id: Uuid::new_v4(),
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Inserts a catalog product with the given price and stock.
    pub async fn seed_product(
        &self,
        name: &str,
        unit_price: Decimal,
        stock_quantity: i32,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
            name: Set(name.to_string()),
            unit_price: Set(unit_price),
            stock_quantity: Set(stock_quantity),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Inserts a member customer.
    #[allow(dead_code)]
    pub async fn seed_customer(&self, name: &str) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(Some(format!("{}@example.com", name.to_lowercase()))),
            phone: Set(Some("0812000111".to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer")
    }

    /// A guest order request for the given (product, quantity) pairs.
    pub fn guest_order(
        &self,
        payment_method: PaymentMethod,
        items: &[(Uuid, i32)],
    ) -> CreateOrderRequest {
        CreateOrderRequest {
            cashier_id: self.cashier_id,
            order_type: OrderType::Guest,
            customer: CustomerInfo::default(),
            customer_id: None,
            guest_name: Some("walk-in".to_string()),
            payment_method,
            items: items
                .iter()
                .map(|(product_id, quantity)| CreateOrderItemRequest {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .collect(),
        }
    }
}
