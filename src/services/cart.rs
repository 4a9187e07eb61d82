use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        cart_item::{self, CartOwner, Entity as CartItemEntity, Model as CartItemModel},
        product::{Entity as ProductEntity, Model as ProductModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::invalidation::{Invalidation, Mutation, Resource},
};

/// A cart row together with the product it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(flatten)]
    pub item: CartItemModel,
    pub product: Option<ProductModel>,
}

/// Row counts produced by [`CartService::merge_session_into_user`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    /// Session rows re-owned by the user unchanged
    pub moved: usize,
    /// Session rows folded into an existing user row
    pub combined: usize,
}

/// Cart reconciliation: one row per (owner, product), quantities kept
/// within the product's sellable stock.
///
/// A cart belongs either to an anonymous session or to a signed-in user,
/// never both. Every mutating call returns the cart cache key it touched so
/// the handler can report it in the response envelope.
///
/// # Examples
///
/// ```ignore
/// let owner = CartOwner::Session("sess-1".to_string());
/// let added = services.cart.add_item(&owner, product_id, 2).await?;
/// assert_eq!(added.value.quantity, 2);
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Sender for `CartItemAdded` and `CartMerged` events
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Lists the owner's cart rows, oldest first.
    ///
    /// Each row carries its product. A product deleted after it was carted
    /// leaves the row in place with `product: None`, so the client can show
    /// it as unavailable instead of losing it silently.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<CartLine>)` - Possibly empty list of rows
    /// * `Err(ServiceError::DatabaseError)` - Query failed
    #[instrument(skip(self))]
    pub async fn list(&self, owner: &CartOwner) -> Result<Vec<CartLine>, ServiceError> {
        let rows = CartItemEntity::find()
            .filter(owner.condition())
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(item, product)| CartLine { item, product })
            .collect())
    }

    /// Adds `quantity` units, merging into an existing row for the same product.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Mutation<CartItemModel>, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        // A concurrent insert for the same (owner, product) loses the unique
        // index race; the retry then takes the increment path.
        let mut attempt = 0;
        let item = loop {
            attempt += 1;
            match self.try_add(owner, product_id, quantity).await? {
                Some(item) => break item,
                None if attempt < 2 => {
                    debug!(%product_id, "cart insert raced, retrying as increment");
                }
                None => {
                    return Err(ServiceError::Conflict(
                        "cart row was modified concurrently".to_string(),
                    ))
                }
            }
        };

        self.event_sender.send_or_log(Event::CartItemAdded {
            cart_item_id: item.id,
            product_id,
            quantity: item.quantity,
        });
        info!(cart_item_id = %item.id, quantity = item.quantity, "cart item added");

        Ok(Mutation::new(item).invalidate(cart_invalidation(owner)))
    }

    async fn try_add(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Option<CartItemModel>, ServiceError> {
        let txn = self.db.begin().await?;

        let product = find_product(&txn, product_id).await?;
        if product.in_stock <= 0 {
            warn!(%product_id, "rejecting add for sold-out product");
            return Err(ServiceError::InsufficientStock(format!(
                "{} is out of stock",
                product.name
            )));
        }

        let now = Utc::now();
        let incremented = CartItemEntity::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).add(quantity),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(now))
            .filter(owner.condition())
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        if incremented.rows_affected == 0 {
            let row = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                session_id: Set(owner.session_id()),
                user_id: Set(owner.user_id()),
                product_id: Set(product_id),
                quantity: Set(quantity.min(product.in_stock)),
                created_at: Set(now),
                updated_at: Set(now),
            };
            return match row.insert(&txn).await {
                Ok(item) => {
                    txn.commit().await?;
                    Ok(Some(item))
                }
                Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    Ok(None)
                }
                Err(err) => Err(err.into()),
            };
        }

        clamp_to_stock(&txn, owner, product_id, product.in_stock).await?;
        let item = find_owned_by_product(&txn, owner, product_id).await?;
        txn.commit().await?;
        Ok(Some(item))
    }

    /// Sets an absolute quantity, clamped to the product's stock.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Mutation<CartItemModel>, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let item = find_owned(&txn, owner, item_id).await?;
        let product = find_product(&txn, item.product_id).await?;
        if product.in_stock <= 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "{} is out of stock",
                product.name
            )));
        }

        let clamped = quantity.min(product.in_stock);
        if clamped != quantity {
            debug!(requested = quantity, clamped, "cart quantity clamped to stock");
        }

        let mut model: cart_item::ActiveModel = item.into();
        model.quantity = Set(clamped);
        model.updated_at = Set(Utc::now());
        let item = model.update(&txn).await?;
        txn.commit().await?;

        info!(cart_item_id = %item_id, quantity = clamped, "cart quantity updated");
        Ok(Mutation::new(item).invalidate(cart_invalidation(owner)))
    }

    /// Applies a relative change. Reaching zero removes the row and yields `None`.
    #[instrument(skip(self))]
    pub async fn adjust_quantity(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
        delta: i32,
    ) -> Result<Mutation<Option<CartItemModel>>, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::ValidationError(
                "delta must not be zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let item = find_owned(&txn, owner, item_id).await?;

        let updated = CartItemEntity::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).add(delta),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::Id.eq(item_id))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Cart item {} not found", item_id)));
        }

        let current = find_owned(&txn, owner, item_id).await?;
        if current.quantity <= 0 {
            CartItemEntity::delete_by_id(item_id).exec(&txn).await?;
            txn.commit().await?;
            info!(cart_item_id = %item_id, "cart item removed by decrement");
            return Ok(Mutation::new(None).invalidate(cart_invalidation(owner)));
        }

        let product = find_product(&txn, item.product_id).await?;
        if product.in_stock <= 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "{} is out of stock; remove it from the cart",
                product.name
            )));
        }
        let item = if current.quantity > product.in_stock {
            let mut model: cart_item::ActiveModel = current.into();
            model.quantity = Set(product.in_stock);
            model.update(&txn).await?
        } else {
            current
        };
        txn.commit().await?;

        info!(cart_item_id = %item_id, quantity = item.quantity, "cart quantity adjusted");
        Ok(Mutation::new(Some(item)).invalidate(cart_invalidation(owner)))
    }

    /// Deletes one row from the owner's cart.
    ///
    /// # Returns
    ///
    /// * `Ok(Mutation<()>)` - Row removed, cart cache key invalidated
    /// * `Err(ServiceError::NotFound)` - No such row for this owner
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
    ) -> Result<Mutation<()>, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(owner.condition())
            .filter(cart_item::Column::Id.eq(item_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Cart item {} not found", item_id)));
        }

        info!(cart_item_id = %item_id, "cart item removed");
        Ok(Mutation::new(()).invalidate(cart_invalidation(owner)))
    }

    /// Empties the cart and reports how many rows were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, owner: &CartOwner) -> Result<Mutation<u64>, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(owner.condition())
            .exec(&*self.db)
            .await?;

        info!(removed = result.rows_affected, "cart cleared");
        Ok(Mutation::new(result.rows_affected).invalidate(cart_invalidation(owner)))
    }

    /// Folds an anonymous session cart into the user's cart after login.
    ///
    /// Products only in the session cart are re-owned. Products in both carts
    /// have their quantities summed and clamped to stock, keeping the user row.
    #[instrument(skip(self))]
    pub async fn merge_session_into_user(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Mutation<MergeSummary>, ServiceError> {
        let session = CartOwner::Session(session_id.to_string());
        let user = CartOwner::User(user_id.to_string());

        let txn = self.db.begin().await?;
        let session_rows = CartItemEntity::find()
            .filter(session.condition())
            .all(&txn)
            .await?;

        let mut summary = MergeSummary::default();
        let now = Utc::now();
        for row in session_rows {
            let existing = CartItemEntity::find()
                .filter(user.condition())
                .filter(cart_item::Column::ProductId.eq(row.product_id))
                .one(&txn)
                .await?;

            match existing {
                None => {
                    let mut model: cart_item::ActiveModel = row.into();
                    model.session_id = Set(None);
                    model.user_id = Set(Some(user_id.to_string()));
                    model.updated_at = Set(now);
                    model.update(&txn).await?;
                    summary.moved += 1;
                }
                Some(user_row) => {
                    let combined = user_row.quantity.saturating_add(row.quantity);
                    let stock = ProductEntity::find_by_id(row.product_id)
                        .one(&txn)
                        .await?
                        .map_or(combined, |p| p.in_stock);
                    let quantity = combined.min(stock).max(1);

                    let mut model: cart_item::ActiveModel = user_row.into();
                    model.quantity = Set(quantity);
                    model.updated_at = Set(now);
                    model.update(&txn).await?;
                    CartItemEntity::delete_by_id(row.id).exec(&txn).await?;
                    summary.combined += 1;
                }
            }
        }
        txn.commit().await?;

        let merged_rows = summary.moved + summary.combined;
        if merged_rows > 0 {
            self.event_sender.send_or_log(Event::CartMerged {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                merged_rows,
            });
        }
        info!(moved = summary.moved, combined = summary.combined, "session cart merged");

        Ok(Mutation::new(summary)
            .invalidate(cart_invalidation(&session))
            .invalidate(cart_invalidation(&user)))
    }
}

/// Cache key for one owner's cart.
pub fn cart_invalidation(owner: &CartOwner) -> Invalidation {
    Invalidation::keyed(Resource::Cart, owner.cache_key())
}

async fn find_product(txn: &DatabaseTransaction, id: Uuid) -> Result<ProductModel, ServiceError> {
    ProductEntity::find_by_id(id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
}

async fn find_owned(
    txn: &DatabaseTransaction,
    owner: &CartOwner,
    item_id: Uuid,
) -> Result<CartItemModel, ServiceError> {
    CartItemEntity::find_by_id(item_id)
        .filter(owner.condition())
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))
}

async fn find_owned_by_product(
    txn: &DatabaseTransaction,
    owner: &CartOwner,
    product_id: Uuid,
) -> Result<CartItemModel, ServiceError> {
    CartItemEntity::find()
        .filter(owner.condition())
        .filter(cart_item::Column::ProductId.eq(product_id))
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart item for product {} not found", product_id)))
}

async fn clamp_to_stock(
    txn: &DatabaseTransaction,
    owner: &CartOwner,
    product_id: Uuid,
    in_stock: i32,
) -> Result<(), ServiceError> {
    CartItemEntity::update_many()
        .col_expr(cart_item::Column::Quantity, Expr::value(in_stock))
        .filter(owner.condition())
        .filter(cart_item::Column::ProductId.eq(product_id))
        .filter(cart_item::Column::Quantity.gt(in_stock))
        .exec(txn)
        .await?;
    Ok(())
}
