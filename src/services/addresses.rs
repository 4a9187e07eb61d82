use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::address::{self, Entity as AddressEntity, Model as AddressModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::invalidation::{Invalidation, Mutation, Resource},
};

/// Caller-supplied fields for a new saved address.
#[derive(Debug, Clone, Default)]
pub struct NewAddress {
    pub full_name: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
}

/// Saved shipping addresses. Each user has at most one default, and the
/// switch happens inside a single transaction.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl AddressService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Default first, then oldest first.
    #[instrument(skip(self))]
    pub async fn list(&self, user_id: &str) -> Result<Vec<AddressModel>, ServiceError> {
        Ok(AddressEntity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_asc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Saves an address for `user_id`.
    ///
    /// The first address a user saves becomes the default regardless of
    /// `is_default`. Asking for a new default clears the previous one in the
    /// same transaction.
    ///
    /// # Returns
    ///
    /// * `Ok(Mutation<AddressModel>)` - The stored address
    /// * `Err(ServiceError::Conflict)` - A concurrent call claimed the default first
    #[instrument(skip(self, input))]
    pub async fn create(
        &self,
        user_id: &str,
        input: NewAddress,
    ) -> Result<Mutation<AddressModel>, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = lock_user_addresses(&txn, user_id).await?;
        let make_default = input.is_default || existing.is_empty();
        if make_default {
            clear_defaults(&txn, user_id).await?;
        }

        let now = Utc::now();
        let created = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id.to_string()),
            full_name: Set(input.full_name.trim().to_string()),
            phone: Set(input.phone.trim().to_string()),
            line1: Set(input.line1.trim().to_string()),
            line2: Set(input.line2.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())),
            city: Set(input.city.trim().to_string()),
            state: Set(input.state.trim().to_string()),
            postal_code: Set(input.postal_code.trim().to_string()),
            country: Set(input.country.trim().to_string()),
            is_default: Set(make_default),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(default_conflict)?;
        txn.commit().await?;

        if make_default {
            self.event_sender.send_or_log(Event::DefaultAddressChanged {
                user_id: user_id.to_string(),
                address_id: created.id,
            });
        }
        info!(address_id = %created.id, is_default = make_default, "address saved");

        Ok(Mutation::new(created).invalidate(Invalidation::keyed(Resource::Addresses, user_id)))
    }

    /// Makes one of the user's addresses the default.
    #[instrument(skip(self))]
    pub async fn set_default(
        &self,
        user_id: &str,
        address_id: Uuid,
    ) -> Result<Mutation<AddressModel>, ServiceError> {
        let txn = self.db.begin().await?;
        let target = lock_user_addresses(&txn, user_id)
            .await?
            .into_iter()
            .find(|a| a.id == address_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        clear_defaults(&txn, user_id).await?;
        let mut model: address::ActiveModel = target.into();
        model.is_default = Set(true);
        model.updated_at = Set(Utc::now());
        let updated = model.update(&txn).await.map_err(default_conflict)?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::DefaultAddressChanged {
            user_id: user_id.to_string(),
            address_id,
        });
        info!(%address_id, "default address changed");

        Ok(Mutation::new(updated).invalidate(Invalidation::keyed(Resource::Addresses, user_id)))
    }

    /// Deletes an address. Removing the default promotes the oldest remaining one.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: &str, address_id: Uuid) -> Result<Mutation<()>, ServiceError> {
        let txn = self.db.begin().await?;
        let mut owned = lock_user_addresses(&txn, user_id).await?;
        let position = owned
            .iter()
            .position(|a| a.id == address_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;
        let target = owned.remove(position);
        AddressEntity::delete_by_id(address_id).exec(&txn).await?;

        let mut promoted = None;
        // `owned` is oldest first, so the head is the next default.
        if let (true, Some(next)) = (target.is_default, owned.into_iter().next()) {
            let mut model: address::ActiveModel = next.into();
            model.is_default = Set(true);
            model.updated_at = Set(Utc::now());
            promoted = Some(model.update(&txn).await.map_err(default_conflict)?.id);
        }
        txn.commit().await?;

        if let Some(next_id) = promoted {
            self.event_sender.send_or_log(Event::DefaultAddressChanged {
                user_id: user_id.to_string(),
                address_id: next_id,
            });
        }
        info!(%address_id, promoted = ?promoted, "address deleted");

        Ok(Mutation::new(()).invalidate(Invalidation::keyed(Resource::Addresses, user_id)))
    }
}

/// Every address `user_id` owns, oldest first, row-locked until `txn` ends.
/// Default switches for one user therefore run one at a time on Postgres.
async fn lock_user_addresses(
    txn: &DatabaseTransaction,
    user_id: &str,
) -> Result<Vec<AddressModel>, ServiceError> {
    Ok(AddressEntity::find()
        .filter(address::Column::UserId.eq(user_id))
        .order_by_asc(address::Column::CreatedAt)
        .lock_exclusive()
        .all(txn)
        .await?)
}

/// A user's first two addresses can race past the row locks since neither
/// row exists yet; `uq_addresses_one_default` turns the loser into a 409.
fn default_conflict(err: DbErr) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(
            "the default address changed concurrently; retry".to_string(),
        ),
        _ => err.into(),
    }
}

async fn clear_defaults(txn: &DatabaseTransaction, user_id: &str) -> Result<(), ServiceError> {
    AddressEntity::update_many()
        .col_expr(address::Column::IsDefault, Expr::value(false))
        .filter(address::Column::UserId.eq(user_id))
        .filter(address::Column::IsDefault.eq(true))
        .exec(txn)
        .await?;
    Ok(())
}
