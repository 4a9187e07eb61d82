use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        cart_item::{CartOwner, Entity as CartItemEntity},
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderItems, OrderStatus},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::cart_invalidation,
        invalidation::{Invalidation, Mutation, Resource},
        pricing::{format_amount, parse_amount},
        Requester,
    },
};

/// Contact and delivery fields copied onto the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingDetails {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_postal_code: String,
}

/// Checkout input. Whichever of `user_id` and `session_id` is set has its cart cleared.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Legacy JSON string, a bare array of lines, or a tagged document
    pub items: Value,
    pub total_amount: Option<String>,
    pub shipping: ShippingDetails,
}

/// Turns carts into orders and serves order reads.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Validates the item snapshot, writes the order and clears the
    /// originating carts in one transaction.
    #[instrument(skip(self, input), fields(user_id = ?input.user_id, session_id = ?input.session_id))]
    pub async fn place_order(&self, input: PlaceOrder) -> Result<Mutation<OrderModel>, ServiceError> {
        let items = parse_items(input.items)?;
        let total = match input.total_amount.as_deref() {
            Some(raw) => parse_amount("totalAmount", raw)?,
            None => items.total().ok_or_else(|| {
                ServiceError::ValidationError("items: order total is too large".to_string())
            })?,
        };

        let txn = self.db.begin().await?;

        let product_ids: Vec<Uuid> = items.lines().iter().map(|l| l.product_id).collect();
        let found: HashSet<Uuid> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if let Some(missing) = product_ids.iter().find(|id| !found.contains(id)) {
            warn!(product_id = %missing, "checkout references unknown product");
            return Err(ServiceError::NotFound(format!("Product {} not found", missing)));
        }

        let now = Utc::now();
        let shipping = input.shipping;
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(input.user_id.clone()),
            session_id: Set(input.session_id.clone()),
            items: Set(items),
            status: Set(OrderStatus::Pending),
            total_amount: Set(format_amount(total)),
            customer_name: Set(shipping.customer_name),
            customer_email: Set(shipping.customer_email),
            customer_phone: Set(shipping.customer_phone),
            shipping_address: Set(shipping.shipping_address),
            shipping_city: Set(shipping.shipping_city),
            shipping_state: Set(shipping.shipping_state),
            shipping_postal_code: Set(shipping.shipping_postal_code),
            return_notes: Set(None),
            refund_status: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let owners: Vec<CartOwner> = [
            input.session_id.map(CartOwner::Session),
            input.user_id.map(CartOwner::User),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !owners.is_empty() {
            let condition = owners
                .iter()
                .fold(Condition::any(), |acc, owner| acc.add(owner.condition()));
            let cleared = CartItemEntity::delete_many()
                .filter(condition)
                .exec(&txn)
                .await?;
            info!(cleared = cleared.rows_affected, "carts cleared at checkout");
        }

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order.id));
        info!(order_id = %order.id, total = %order.total_amount, "order placed");

        let mut mutation = Mutation::new(order).invalidate(Invalidation::all(Resource::Orders));
        for owner in &owners {
            mutation = mutation.invalidate(cart_invalidation(owner));
        }
        Ok(mutation)
    }

    /// The user's orders, newest first.
    ///
    /// Guest orders placed before sign-in are not included.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Loads an order the requester is allowed to see.
    #[instrument(skip(self, requester), fields(user_id = %requester.user_id))]
    pub async fn get_order(&self, id: Uuid, requester: &Requester) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

        if !requester.can_access(&order) {
            return Err(ServiceError::Forbidden(format!(
                "Order {} belongs to another customer",
                id
            )));
        }
        Ok(order)
    }

    /// Seller view of every order, optionally narrowed to one status.
    #[instrument(skip(self))]
    pub async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = OrderEntity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        Ok(query
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

fn parse_items(raw: Value) -> Result<OrderItems, ServiceError> {
    let parsed = match raw {
        Value::String(text) => OrderItems::from_json_str(&text),
        other => OrderItems::from_json_value(other),
    };
    parsed.map_err(|err| ServiceError::ValidationError(format!("items: {err}")))
}
