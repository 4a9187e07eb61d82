use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cart row owned by exactly one of an anonymous session or a user.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_items")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_delete = "Cascade"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Who a cart belongs to. Session and user ownership are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartOwner {
    Session(String),
    User(String),
}

impl CartOwner {
    /// Builds an owner from the optional request fields; exactly one must be set.
    pub fn from_parts(session_id: Option<String>, user_id: Option<String>) -> Option<Self> {
        let session_id = session_id.filter(|s| !s.trim().is_empty());
        let user_id = user_id.filter(|s| !s.trim().is_empty());
        match (session_id, user_id) {
            (Some(session_id), None) => Some(Self::Session(session_id)),
            (None, Some(user_id)) => Some(Self::User(user_id)),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        match self {
            Self::Session(id) => Some(id.clone()),
            Self::User(_) => None,
        }
    }

    pub fn user_id(&self) -> Option<String> {
        match self {
            Self::User(id) => Some(id.clone()),
            Self::Session(_) => None,
        }
    }

    /// Key used in cache-invalidation contracts, e.g. `session:abc`.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Session(id) => format!("session:{id}"),
            Self::User(id) => format!("user:{id}"),
        }
    }

    /// Filter selecting every row owned by this owner.
    pub fn condition(&self) -> sea_orm::Condition {
        match self {
            Self::Session(id) => sea_orm::Condition::all()
                .add(Column::SessionId.eq(id.as_str()))
                .add(Column::UserId.is_null()),
            Self::User(id) => sea_orm::Condition::all()
                .add(Column::UserId.eq(id.as_str()))
                .add(Column::SessionId.is_null()),
        }
    }
}
