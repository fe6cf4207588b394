//! Request validation and line-item pricing.
//!
//! Validation is explicit code rather than derive-macro annotations so the
//! per-order-type conditional rules live in one place and every violation is
//! reported with its field name. Pricing resolves each line against current
//! catalog state; both are pure reads with no side effects.

use crate::{
    entities::product::Entity as ProductEntity,
    errors::{ServiceError, ValidationFailure},
    services::orders::{CreateOrderItemRequest, CreateOrderRequest, OrderType},
    services::refunds::CreateRefundRequest,
};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, EntityTrait};
use uuid::Uuid;

/// One line of a request priced against the catalog. `product_name` and
/// `unit_price` are the snapshots the order items will carry.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct PricedOrder {
    pub lines: Vec<PricedLine>,
    pub total_amount: Decimal,
}

/// Validates a `CreateOrderRequest`, collecting every field violation.
///
/// Required fields depend on the order type:
/// - `new`: customer name, email, and phone
/// - `guest`: a guest display name
/// - `member`: a customer id (existence is checked inside the transaction)
pub fn validate_create_order(request: &CreateOrderRequest) -> Result<(), ServiceError> {
    let mut failure = ValidationFailure::new();

    match request.order_type {
        OrderType::New => {
            if is_blank(&request.customer.name) {
                failure.push("customer.name", "name is required for new customers");
            }
            match trimmed(&request.customer.email) {
                None => failure.push("customer.email", "email is required for new customers"),
                Some(email) if !validator::validate_email(email) => {
                    failure.push("customer.email", "email is not well-formed");
                }
                Some(_) => {}
            }
            if is_blank(&request.customer.phone) {
                failure.push("customer.phone", "phone is required for new customers");
            }
        }
        OrderType::Guest => {
            if is_blank(&request.guest_name) {
                failure.push("guest_name", "guest name is required for guest orders");
            }
        }
        OrderType::Member => {
            if request.customer_id.is_none() {
                failure.push("customer_id", "customer id is required for member orders");
            }
        }
    }

    if request.items.is_empty() {
        failure.push("items", "at least one item is required");
    }
    for (index, item) in request.items.iter().enumerate() {
        if item.quantity < 1 {
            failure.push(
                format!("items[{}].quantity", index),
                "quantity must be at least 1",
            );
        }
    }

    failure.into_result()
}

/// Validates a `CreateRefundRequest`.
pub fn validate_create_refund(request: &CreateRefundRequest) -> Result<(), ServiceError> {
    let mut failure = ValidationFailure::new();

    if request.trx_number.trim().is_empty() {
        failure.push("trx_number", "transaction number is required");
    }
    if request.reason.trim().is_empty() {
        failure.push("reason", "reason is required");
    }

    failure.into_result()
}

/// Resolves the current unit price and name snapshot for every requested
/// line and computes exact decimal totals. Fails with `NotFound` on the
/// first product that does not exist or is no longer active.
pub async fn price_items<C: ConnectionTrait>(
    conn: &C,
    items: &[CreateOrderItemRequest],
) -> Result<PricedOrder, ServiceError> {
    let mut lines = Vec::with_capacity(items.len());
    let mut total_amount = Decimal::ZERO;

    for item in items {
        let product = ProductEntity::find_by_id(item.product_id)
            .one(conn)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("product {} not found", item.product_id))
            })?;

        let total_price = product.unit_price * Decimal::from(item.quantity);
        total_amount += total_price;
        lines.push(PricedLine {
            product_id: product.id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: product.unit_price,
            total_price,
        });
    }

    Ok(PricedOrder {
        lines,
        total_amount,
    })
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PaymentMethod;
    use crate::services::orders::CustomerInfo;

    fn base_request(order_type: OrderType) -> CreateOrderRequest {
        CreateOrderRequest {
            cashier_id: Uuid::new_v4(),
            order_type,
            customer: CustomerInfo::default(),
            customer_id: None,
            guest_name: None,
            payment_method: PaymentMethod::Cash,
            items: vec![CreateOrderItemRequest {
                product_id: Uuid::new_v4(),
                quantity: 1,
            }],
        }
    }

    fn violation_fields(err: ServiceError) -> Vec<String> {
        match err {
            ServiceError::Validation(failure) => {
                failure.violations.into_iter().map(|v| v.field).collect()
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn new_order_requires_full_customer_details() {
        let mut request = base_request(OrderType::New);
        request.customer.name = Some("Rina".into());
        request.customer.phone = Some("0812000111".into());

        let fields = violation_fields(validate_create_order(&request).unwrap_err());
        assert_eq!(fields, vec!["customer.email"]);
    }

    #[test]
    fn new_order_rejects_malformed_email() {
        let mut request = base_request(OrderType::New);
        request.customer = CustomerInfo {
            name: Some("Rina".into()),
            phone: Some("0812000111".into()),
            email: Some("not-an-email".into()),
        };

        let fields = violation_fields(validate_create_order(&request).unwrap_err());
        assert_eq!(fields, vec!["customer.email"]);
    }

    #[test]
    fn guest_order_requires_display_name() {
        let request = base_request(OrderType::Guest);
        let fields = violation_fields(validate_create_order(&request).unwrap_err());
        assert_eq!(fields, vec!["guest_name"]);

        let mut named = base_request(OrderType::Guest);
        named.guest_name = Some("walk-in".into());
        assert!(validate_create_order(&named).is_ok());
    }

    #[test]
    fn member_order_requires_customer_id() {
        let request = base_request(OrderType::Member);
        let fields = violation_fields(validate_create_order(&request).unwrap_err());
        assert_eq!(fields, vec!["customer_id"]);
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected_identically() {
        for quantity in [0, -3] {
            let mut request = base_request(OrderType::Member);
            request.customer_id = Some(Uuid::new_v4());
            request.items[0].quantity = quantity;

            let fields = violation_fields(validate_create_order(&request).unwrap_err());
            assert_eq!(fields, vec!["items[0].quantity"]);
        }
    }

    #[test]
    fn empty_items_are_rejected() {
        let mut request = base_request(OrderType::Member);
        request.customer_id = Some(Uuid::new_v4());
        request.items.clear();

        let fields = violation_fields(validate_create_order(&request).unwrap_err());
        assert_eq!(fields, vec!["items"]);
    }

    #[test]
    fn all_violations_are_collected_in_one_pass() {
        let mut request = base_request(OrderType::New);
        request.items = vec![
            CreateOrderItemRequest {
                product_id: Uuid::new_v4(),
                quantity: 0,
            },
            CreateOrderItemRequest {
                product_id: Uuid::new_v4(),
                quantity: 2,
            },
        ];

        let fields = violation_fields(validate_create_order(&request).unwrap_err());
        assert_eq!(
            fields,
            vec![
                "customer.name",
                "customer.email",
                "customer.phone",
                "items[0].quantity"
            ]
        );
    }

    #[test]
    fn refund_request_requires_trx_number_and_reason() {
        let request = CreateRefundRequest {
            trx_number: "  ".into(),
            reason: String::new(),
            refunded_by: Uuid::new_v4(),
        };

        let fields = violation_fields(validate_create_refund(&request).unwrap_err());
        assert_eq!(fields, vec!["trx_number", "reason"]);
    }
}
