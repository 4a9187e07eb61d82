use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{AsRefStr, EnumString};
use uuid::Uuid;

use super::return_request::ReturnStatus;
use crate::services::pricing::{check_amount, AmountError};

/// Placed order. `items` is a snapshot taken at checkout and is never joined
/// back to live product rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub items: OrderItems,
    pub status: OrderStatus,
    pub total_amount: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_postal_code: String,
    pub return_notes: Option<String>,
    pub refund_status: Option<ReturnStatus>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::return_request::Entity")]
    Returns,
}

impl Related<super::return_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Returns.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether `user_id` may see this order. Guest orders belong to nobody.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Forward-only order lifecycle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    EnumString,
    AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
}

impl OrderStatus {
    /// The single status that may follow this one, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            Self::Pending => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }

    pub fn can_advance_to(self, target: OrderStatus) -> bool {
        self.next() == Some(target)
    }
}

/// One snapshotted line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
}

impl OrderLine {
    /// Unit price times `quantity`; `None` when the product does not fit a `Decimal`.
    pub fn amount_for(&self, quantity: i32) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(quantity))
    }

    pub fn line_total(&self) -> Option<Decimal> {
        self.amount_for(self.quantity)
    }
}

/// Versioned, tagged item snapshot stored in `orders.items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(tag = "version")]
pub enum OrderItems {
    #[serde(rename = "v1")]
    V1 { lines: Vec<OrderLine> },
}

/// Why an item payload was refused at write time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemsError {
    #[error("items could not be parsed: {0}")]
    Malformed(String),
    #[error("an order needs at least one item")]
    Empty,
    #[error("item {product_id} has quantity {quantity}; quantity must be at least 1")]
    NonPositiveQuantity { product_id: Uuid, quantity: i32 },
    #[error("item {product_id} price {reason}")]
    InvalidPrice { product_id: Uuid, reason: AmountError },
    #[error("order total is too large")]
    TotalOutOfRange,
    #[error("item {0} has an empty product name")]
    MissingName(Uuid),
    #[error("item {0} appears more than once")]
    DuplicateProduct(Uuid),
}

impl OrderItems {
    pub fn v1(lines: Vec<OrderLine>) -> Self {
        Self::V1 { lines }
    }

    /// Accepts either a tagged document or a bare array of lines.
    pub fn from_json_str(raw: &str) -> Result<Self, ItemsError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ItemsError::Malformed(e.to_string()))?;
        Self::from_json_value(value)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ItemsError> {
        let items = if value.is_array() {
            let lines: Vec<OrderLine> =
                serde_json::from_value(value).map_err(|e| ItemsError::Malformed(e.to_string()))?;
            Self::v1(lines)
        } else {
            serde_json::from_value(value).map_err(|e| ItemsError::Malformed(e.to_string()))?
        };
        items.validate()?;
        Ok(items)
    }

    pub fn lines(&self) -> &[OrderLine] {
        match self {
            Self::V1 { lines } => lines,
        }
    }

    pub fn line_for(&self, product_id: Uuid) -> Option<&OrderLine> {
        self.lines().iter().find(|line| line.product_id == product_id)
    }

    /// Sum of line totals, or `None` on overflow. Always `Some` for validated items.
    pub fn total(&self) -> Option<Decimal> {
        self.lines()
            .iter()
            .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.line_total()?))
    }

    pub fn validate(&self) -> Result<(), ItemsError> {
        let lines = self.lines();
        if lines.is_empty() {
            return Err(ItemsError::Empty);
        }

        let mut seen = HashSet::with_capacity(lines.len());
        for line in lines {
            if line.quantity < 1 {
                return Err(ItemsError::NonPositiveQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                });
            }
            check_amount(line.price).map_err(|reason| ItemsError::InvalidPrice {
                product_id: line.product_id,
                reason,
            })?;
            if line.product_name.trim().is_empty() {
                return Err(ItemsError::MissingName(line.product_id));
            }
            if !seen.insert(line.product_id) {
                return Err(ItemsError::DuplicateProduct(line.product_id));
            }
        }
        if self.total().is_none() {
            return Err(ItemsError::TotalOutOfRange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::services::pricing::max_amount;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn line(quantity: i32, price: Decimal) -> OrderLine {
        OrderLine {
            product_id: Uuid::new_v4(),
            product_name: "Kanjivaram Silk".into(),
            quantity,
            price,
        }
    }

    #[test]
    fn status_only_moves_one_step_forward() {
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_advance_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.can_advance_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_advance_to(OrderStatus::Shipped));
        assert_eq!(OrderStatus::Delivered.next(), None);
    }

    #[test]
    fn status_parsing_rejects_unknown_values() {
        assert_eq!(OrderStatus::from_str("shipped").unwrap(), OrderStatus::Shipped);
        assert!(OrderStatus::from_str("cancelled").is_err());
    }

    #[test]
    fn bare_array_is_upgraded_to_v1() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"[{{"productId":"{id}","productName":"Banarasi","quantity":2,"price":"1499.50"}}]"#
        );
        let items = OrderItems::from_json_str(&raw).unwrap();
        assert_eq!(items.lines().len(), 1);
        assert_eq!(items.line_for(id).unwrap().price, dec!(1499.50));
        assert_eq!(items.total(), Some(dec!(2999.00)));
    }

    #[test]
    fn tagged_document_serializes_with_version() {
        let items = OrderItems::v1(vec![line(1, dec!(10))]);
        let value = serde_json::to_value(&items).unwrap();
        assert_eq!(value["version"], "v1");

        let parsed = OrderItems::from_json_value(value).unwrap();
        assert_eq!(parsed, items);
    }

    #[test]
    fn oversized_prices_are_refused_instead_of_overflowing() {
        let huge = line(2, Decimal::MAX);
        assert_eq!(huge.line_total(), None);
        assert_eq!(OrderItems::v1(vec![huge.clone()]).total(), None);
        assert_matches!(
            OrderItems::v1(vec![huge]).validate(),
            Err(ItemsError::InvalidPrice { reason: AmountError::TooLarge, .. })
        );

        let at_limit = line(i32::MAX, max_amount());
        let items = OrderItems::v1(vec![at_limit]);
        assert!(items.validate().is_ok());
        assert!(items.total().is_some());
    }

    #[test]
    fn unknown_version_is_malformed() {
        let raw = r#"{"version":"v9","lines":[]}"#;
        assert_matches!(OrderItems::from_json_str(raw), Err(ItemsError::Malformed(_)));
    }

    #[test]
    fn write_time_validation_rejects_bad_lines() {
        assert_matches!(OrderItems::v1(vec![]).validate(), Err(ItemsError::Empty));
        assert_matches!(
            OrderItems::v1(vec![line(0, dec!(5))]).validate(),
            Err(ItemsError::NonPositiveQuantity { quantity: 0, .. })
        );
        assert_matches!(
            OrderItems::v1(vec![line(1, dec!(-1))]).validate(),
            Err(ItemsError::InvalidPrice { reason: AmountError::Negative, .. })
        );
        assert_matches!(
            OrderItems::v1(vec![line(1, dec!(1.999))]).validate(),
            Err(ItemsError::InvalidPrice { reason: AmountError::TooPrecise, .. })
        );

        let duplicate = line(1, dec!(5));
        assert_matches!(
            OrderItems::v1(vec![duplicate.clone(), duplicate]).validate(),
            Err(ItemsError::DuplicateProduct(_))
        );
    }
}
