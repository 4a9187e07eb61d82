//! The single authority over order status. Moving an order to `shipped`
//! consumes product stock, exactly once per order.

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderLine, OrderStatus},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::invalidation::{Invalidation, Mutation, Resource},
};

/// Stock movement applied for one order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub product_id: Uuid,
    pub requested: i32,
    pub remaining: i32,
}

/// Moves orders through their status graph and decrements stock on shipment.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderLifecycleService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Moves `order_id` to `target`.
    ///
    /// Same-status requests return the order untouched. Only single forward
    /// steps are accepted. The status swap is a compare-and-set on the old
    /// status, so when two requests race to ship an order only the winner
    /// decrements stock.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<Mutation<OrderModel>, ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order(&txn, order_id).await?;
        let current = order.status;

        if current == target {
            info!(%order_id, status = target.as_ref(), "status unchanged");
            return Ok(Mutation::new(order));
        }
        if !current.can_advance_to(target) {
            warn!(%order_id, from = current.as_ref(), to = target.as_ref(), "rejected status transition");
            return Err(ServiceError::InvalidOperation(format!(
                "cannot move order from {} to {}",
                current.as_ref(),
                target.as_ref()
            )));
        }

        let now = Utc::now();
        if !swap_status(&txn, order_id, current, target, now).await? {
            drop(txn);
            return self.settle_lost_swap(order_id, target).await;
        }

        let decrements = if target == OrderStatus::Shipped {
            decrement_stock(&txn, order_id, order.items.lines()).await?
        } else {
            Vec::new()
        };

        let updated = find_order(&txn, order_id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id,
            old_status: current.as_ref().to_string(),
            new_status: target.as_ref().to_string(),
        });
        for d in &decrements {
            self.event_sender.send_or_log(Event::StockDecremented {
                order_id,
                product_id: d.product_id,
                requested: d.requested,
                remaining: d.remaining,
            });
        }
        info!(%order_id, from = current.as_ref(), to = target.as_ref(), decremented = decrements.len(), "order status changed");

        let mut mutation = Mutation::new(updated)
            .invalidate(Invalidation::keyed(Resource::Order, order_id))
            .invalidate(Invalidation::all(Resource::Orders));
        if !decrements.is_empty() {
            mutation = mutation.invalidate(Invalidation::all(Resource::Products));
            for d in &decrements {
                mutation = mutation.invalidate(Invalidation::keyed(Resource::Product, d.product_id));
            }
        }
        Ok(mutation)
    }

    /// Outcome for a request whose compare-and-set found the status already
    /// moved. Nothing was applied, so no stock changes and no events.
    async fn settle_lost_swap(
        &self,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<Mutation<OrderModel>, ServiceError> {
        let latest = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if latest.status == target {
            info!(%order_id, status = target.as_ref(), "concurrent request already applied status");
            return Ok(Mutation::new(latest));
        }
        warn!(%order_id, status = latest.status.as_ref(), wanted = target.as_ref(), "lost status race");
        Err(ServiceError::Conflict(format!(
            "order {} changed status concurrently",
            order_id
        )))
    }
}

/// Sets `to` (and its timestamp) only while the row still holds `from`.
/// Returns whether this call performed the change.
async fn swap_status(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let mut update = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));
    update = match to {
        OrderStatus::Shipped => update.col_expr(order::Column::ShippedAt, Expr::value(Some(now))),
        OrderStatus::Delivered => update.col_expr(order::Column::DeliveredAt, Expr::value(Some(now))),
        OrderStatus::Pending => update,
    };
    let swapped = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(from))
        .exec(txn)
        .await?;
    Ok(swapped.rows_affected == 1)
}

async fn find_order(txn: &DatabaseTransaction, order_id: Uuid) -> Result<OrderModel, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Subtracts each line's quantity from `in_stock` without a read-modify-write,
/// flooring at zero. Lines whose product was deleted are skipped.
async fn decrement_stock(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    lines: &[OrderLine],
) -> Result<Vec<StockDecrement>, ServiceError> {
    let mut applied = Vec::with_capacity(lines.len());

    for line in lines {
        let now = Utc::now();
        let subtracted = ProductEntity::update_many()
            .col_expr(
                product::Column::InStock,
                Expr::col(product::Column::InStock).sub(line.quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(now))
            .filter(product::Column::Id.eq(line.product_id))
            .filter(product::Column::InStock.gte(line.quantity))
            .exec(txn)
            .await?;

        if subtracted.rows_affected == 0 {
            let floored = ProductEntity::update_many()
                .col_expr(product::Column::InStock, Expr::value(0))
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(line.product_id))
                .exec(txn)
                .await?;
            if floored.rows_affected == 0 {
                warn!(%order_id, product_id = %line.product_id, "shipped line references a deleted product");
                continue;
            }
            warn!(%order_id, product_id = %line.product_id, requested = line.quantity, "stock short at shipment, floored at zero");
        }

        let remaining = ProductEntity::find_by_id(line.product_id)
            .one(txn)
            .await?
            .map_or(0, |p| p.in_stock);
        applied.push(StockDecrement {
            product_id: line.product_id,
            requested: line.quantity,
            remaining,
        });
    }

    Ok(applied)
}
