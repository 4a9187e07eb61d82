use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use uuid::Uuid;

/// Catalog product with its channel allocation.
///
/// `total_stock` is the quantity allocated when the product was created and
/// never changes afterwards. `in_stock` is the storefront-sellable count and
/// is decremented as orders ship.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub tracking_id: String,
    pub name: String,
    pub description: Option<String>,
    pub fabric: String,
    pub color: String,
    pub occasion: String,
    pub category: String,
    /// Decimal price kept as its canonical string form
    pub price: String,
    pub image_url: Option<String>,
    pub channel: FulfillmentChannel,
    pub total_stock: i32,
    pub in_stock: i32,
    #[sea_orm(column_type = "Json")]
    pub store_inventory: StoreInventory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Which fulfillment pathways a listing is stocked through.
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FulfillmentChannel {
    #[sea_orm(string_value = "online")]
    Online,
    #[sea_orm(string_value = "physical")]
    Physical,
    #[sea_orm(string_value = "both")]
    Both,
}

/// The channel an individual allocation entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationChannel {
    /// Central warehouse serving the web storefront
    Online,
    /// A named brick-and-mortar store
    #[default]
    Physical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAllocation {
    pub store_id: String,
    pub quantity: i32,
    pub channel: AllocationChannel,
}

/// Allocation breakdown persisted on the product row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct StoreInventory(pub Vec<StoreAllocation>);

impl StoreInventory {
    pub fn entries(&self) -> &[StoreAllocation] {
        &self.0
    }

    pub fn online_quantity(&self) -> i32 {
        self.quantity_for(AllocationChannel::Online)
    }

    pub fn physical_quantity(&self) -> i32 {
        self.quantity_for(AllocationChannel::Physical)
    }

    pub fn total(&self) -> i32 {
        self.0.iter().map(|entry| entry.quantity).sum()
    }

    fn quantity_for(&self, channel: AllocationChannel) -> i32 {
        self.0
            .iter()
            .filter(|entry| entry.channel == channel)
            .map(|entry| entry.quantity)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn store_inventory_splits_by_channel() {
        let inventory = StoreInventory(vec![
            StoreAllocation {
                store_id: "online".into(),
                quantity: 6,
                channel: AllocationChannel::Online,
            },
            StoreAllocation {
                store_id: "chennai-tnagar".into(),
                quantity: 4,
                channel: AllocationChannel::Physical,
            },
        ]);

        assert_eq!(inventory.online_quantity(), 6);
        assert_eq!(inventory.physical_quantity(), 4);
        assert_eq!(inventory.total(), 10);
    }

    #[test]
    fn store_inventory_serializes_as_plain_list() {
        let inventory = StoreInventory(vec![StoreAllocation {
            store_id: "kanchipuram".into(),
            quantity: 2,
            channel: AllocationChannel::Physical,
        }]);
        let json = serde_json::to_value(&inventory).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "storeId": "kanchipuram", "quantity": 2, "channel": "physical" }])
        );
    }

    #[test]
    fn channel_parses_lowercase_names() {
        assert_eq!(
            FulfillmentChannel::from_str("both").unwrap(),
            FulfillmentChannel::Both
        );
        assert_eq!(FulfillmentChannel::Online.as_ref(), "online");
        assert!(FulfillmentChannel::from_str("warehouse").is_err());
    }
}
