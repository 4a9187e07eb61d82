use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
        return_request::{self, Entity as ReturnEntity, Model as ReturnModel, ReturnStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        invalidation::{Invalidation, Mutation, Resource},
        pricing::{format_amount, parse_amount},
        Requester,
    },
};

/// A customer's return request for one order line.
#[derive(Debug, Clone)]
pub struct NewReturn {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
    /// Optional client-computed refund; must equal unit price × quantity
    pub refund_amount: Option<String>,
}

/// Customer return requests and the seller's approve/reject decision.
///
/// Approving a return never restocks inventory; goods come back through a
/// separate, manual process.
#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ReturnService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Opens a return against a delivered order line.
    ///
    /// The refund is the line's unit price times the returned quantity, fixed
    /// at request time. Only one open return may exist per line; a rejected
    /// one frees the line for another request.
    ///
    /// # Returns
    ///
    /// * `Ok(Mutation<ReturnModel>)` - The return in `requested` status
    /// * `Err(ServiceError::Forbidden)` - Order belongs to another customer
    /// * `Err(ServiceError::InvalidOperation)` - Order is not delivered yet
    /// * `Err(ServiceError::Conflict)` - The line already has an open return
    #[instrument(skip(self, requester, input), fields(user_id = %requester.user_id, order_id = %input.order_id, product_id = %input.product_id))]
    pub async fn request_return(
        &self,
        requester: &Requester,
        input: NewReturn,
    ) -> Result<Mutation<ReturnModel>, ServiceError> {
        let reason = input.reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "reason must not be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let order = find_order(&txn, input.order_id).await?;
        if !requester.can_access(&order) {
            return Err(ServiceError::Forbidden(format!(
                "Order {} belongs to another customer",
                order.id
            )));
        }
        if order.status != OrderStatus::Delivered {
            warn!(status = order.status.as_ref(), "return requested before delivery");
            return Err(ServiceError::InvalidOperation(
                "returns can only be requested for delivered orders".to_string(),
            ));
        }

        let line = order.items.line_for(input.product_id).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "product {} is not part of order {}",
                input.product_id, order.id
            ))
        })?;
        if input.quantity < 1 || input.quantity > line.quantity {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between 1 and {}",
                line.quantity
            )));
        }

        let refund = line.amount_for(input.quantity).ok_or_else(|| {
            ServiceError::InternalError(format!("refund for order {} overflows", order.id))
        })?;
        if let Some(raw) = input.refund_amount.as_deref() {
            let claimed = parse_amount("refundAmount", raw)?;
            if claimed != refund {
                return Err(ServiceError::ValidationError(format!(
                    "refundAmount {} does not match {} x {}",
                    format_amount(claimed),
                    format_amount(line.price),
                    input.quantity
                )));
            }
        }

        let open = ReturnEntity::find()
            .filter(return_request::Column::OrderId.eq(order.id))
            .filter(return_request::Column::ProductId.eq(input.product_id))
            .filter(return_request::Column::Status.ne(ReturnStatus::Rejected))
            .one(&txn)
            .await?;
        if let Some(existing) = open {
            warn!(existing_return = %existing.id, "duplicate return request");
            return Err(ServiceError::Conflict(format!(
                "a return for this item is already {}",
                existing.status.as_ref()
            )));
        }

        let now = Utc::now();
        let created = return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(input.product_id),
            user_id: Set(Some(requester.user_id.clone())),
            quantity: Set(input.quantity),
            reason: Set(reason.clone()),
            refund_amount: Set(format_amount(refund)),
            status: Set(ReturnStatus::Requested),
            requested_at: Set(now),
            approved_at: Set(None),
            rejected_at: Set(None),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(duplicate_return)?;

        let order_id = order.id;
        let mut order: order::ActiveModel = order.into();
        order.refund_status = Set(Some(ReturnStatus::Requested));
        order.return_notes = Set(Some(reason));
        order.updated_at = Set(now);
        order.update(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::ReturnRequested {
            return_id: created.id,
            order_id,
        });
        info!(return_id = %created.id, refund = %created.refund_amount, "return requested");

        Ok(Mutation::new(created).invalidate_all(return_invalidations(order_id)))
    }

    /// Returns visible to the requester, optionally scoped to one order.
    #[instrument(skip(self, requester), fields(user_id = %requester.user_id))]
    pub async fn list_for_user(
        &self,
        requester: &Requester,
        order_id: Option<Uuid>,
    ) -> Result<Vec<ReturnModel>, ServiceError> {
        let mut query = ReturnEntity::find();
        match order_id {
            Some(order_id) => {
                let order = OrderEntity::find_by_id(order_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
                if !requester.can_access(&order) {
                    return Err(ServiceError::Forbidden(format!(
                        "Order {} belongs to another customer",
                        order_id
                    )));
                }
                query = query.filter(return_request::Column::OrderId.eq(order_id));
            }
            None => {
                query = query.filter(return_request::Column::UserId.eq(requester.user_id.as_str()));
            }
        }

        Ok(query
            .order_by_desc(return_request::Column::RequestedAt)
            .all(&*self.db)
            .await?)
    }

    /// Seller queue of returns, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self, status: Option<ReturnStatus>) -> Result<Vec<ReturnModel>, ServiceError> {
        let mut query = ReturnEntity::find();
        if let Some(status) = status {
            query = query.filter(return_request::Column::Status.eq(status));
        }
        Ok(query
            .order_by_desc(return_request::Column::RequestedAt)
            .all(&*self.db)
            .await?)
    }

    /// Approves or rejects a pending return and mirrors the outcome onto the order.
    #[instrument(skip(self, notes))]
    pub async fn decide(
        &self,
        return_id: Uuid,
        decision: ReturnStatus,
        notes: Option<String>,
    ) -> Result<Mutation<ReturnModel>, ServiceError> {
        if !decision.is_decision() {
            return Err(ServiceError::ValidationError(
                "status must be approved or rejected".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let existing = ReturnEntity::find_by_id(return_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;

        let now = Utc::now();
        let stamp = if decision == ReturnStatus::Approved {
            return_request::Column::ApprovedAt
        } else {
            return_request::Column::RejectedAt
        };
        let decided = ReturnEntity::update_many()
            .col_expr(return_request::Column::Status, Expr::value(decision))
            .col_expr(stamp, Expr::value(Some(now)))
            .col_expr(return_request::Column::UpdatedAt, Expr::value(now))
            .filter(return_request::Column::Id.eq(return_id))
            .filter(return_request::Column::Status.eq(ReturnStatus::Requested))
            .exec(&txn)
            .await?;
        if decided.rows_affected == 0 {
            warn!(%return_id, status = existing.status.as_ref(), "return already decided");
            return Err(ServiceError::InvalidOperation(format!(
                "return is already {}",
                existing.status.as_ref()
            )));
        }

        let order = find_order(&txn, existing.order_id).await?;
        let mut order_update: order::ActiveModel = order.into();
        order_update.refund_status = Set(Some(decision));
        if let Some(notes) = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            order_update.return_notes = Set(Some(notes));
        }
        order_update.updated_at = Set(now);
        order_update.update(&txn).await?;

        let updated = ReturnEntity::find_by_id(return_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;
        txn.commit().await?;

        let event = match decision {
            ReturnStatus::Approved => Event::ReturnApproved(return_id),
            _ => Event::ReturnRejected(return_id),
        };
        self.event_sender.send_or_log(event);
        info!(%return_id, status = decision.as_ref(), "return decided");

        Ok(Mutation::new(updated).invalidate_all(return_invalidations(existing.order_id)))
    }
}

fn return_invalidations(order_id: Uuid) -> [Invalidation; 4] {
    [
        Invalidation::all(Resource::Returns),
        Invalidation::keyed(Resource::Returns, order_id),
        Invalidation::keyed(Resource::Order, order_id),
        Invalidation::all(Resource::Orders),
    ]
}

/// Loads the order with a row lock held until `txn` ends, so return requests
/// and decisions on one order run one at a time (no-op on SQLite, which
/// serializes writers anyway).
async fn find_order(txn: &DatabaseTransaction, order_id: Uuid) -> Result<OrderModel, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// `uq_returns_open_line` rejects a second open return for the same line.
fn duplicate_return(err: DbErr) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::Conflict("a return for this item is already open".to_string())
        }
        _ => err.into(),
    }
}
