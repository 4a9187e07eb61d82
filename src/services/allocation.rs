//! Distributes a product's opening stock across the online warehouse and
//! physical stores, and enforces that the distribution is complete.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::entities::product::{
    AllocationChannel, FulfillmentChannel, StoreAllocation, StoreInventory,
};

/// Store id used for the implicit online bucket.
pub const ONLINE_WAREHOUSE_ID: &str = "online";

/// Units assigned to one store or to the online warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    pub store_id: String,
    pub quantity: i32,
    #[serde(default)]
    pub channel: AllocationChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    pub total_stock: i32,
    pub channel: FulfillmentChannel,
    #[serde(default)]
    pub allocations: Vec<AllocationEntry>,
}

impl AllocationRequest {
    /// Whole stock listed on the website.
    pub fn online_only(total_stock: i32) -> Self {
        Self {
            total_stock,
            channel: FulfillmentChannel::Online,
            allocations: Vec::new(),
        }
    }
}

/// An accepted allocation, ready to persist on the product row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub channel: FulfillmentChannel,
    pub total_stock: i32,
    pub store_inventory: StoreInventory,
}

impl AllocationPlan {
    /// Units the web storefront may sell.
    pub fn online_quantity(&self) -> i32 {
        self.store_inventory.online_quantity()
    }
}

/// Why an allocation request cannot be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("total stock must be positive, got {0}")]
    NonPositiveTotal(i32),
    #[error("allocation entries need a store id")]
    EmptyStoreId,
    #[error("store {store_id} has negative quantity {quantity}")]
    NegativeQuantity { store_id: String, quantity: i32 },
    #[error("store {0} is allocated more than once")]
    DuplicateStore(String),
    #[error("{remaining} units remain unallocated")]
    Unallocated { remaining: i64 },
    #[error("allocations exceed total stock by {excess} units")]
    OverAllocated { excess: i64 },
    #[error("a physical listing needs at least one store with stock")]
    NoPhysicalAllocation,
    #[error("an online-only listing cannot allocate stock to physical stores")]
    PhysicalStockOnOnlineListing,
    #[error("a physical-only listing cannot allocate stock online")]
    OnlineStockOnPhysicalListing,
}

impl AllocationError {
    /// Stable machine-readable code for error details.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonPositiveTotal(_) => "non_positive_total",
            Self::EmptyStoreId => "empty_store_id",
            Self::NegativeQuantity { .. } => "negative_quantity",
            Self::DuplicateStore(_) => "duplicate_store",
            Self::Unallocated { .. } => "unallocated",
            Self::OverAllocated { .. } => "over_allocated",
            Self::NoPhysicalAllocation => "no_physical_allocation",
            Self::PhysicalStockOnOnlineListing => "physical_on_online_listing",
            Self::OnlineStockOnPhysicalListing => "online_on_physical_listing",
        }
    }
}

/// Pure validation of how a product's stock is split across stores.
///
/// Holds no state; the product service calls it before any write.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationService;

impl AllocationService {
    pub fn new() -> Self {
        Self
    }

    /// Validates `request` and produces the breakdown to persist.
    pub fn plan(&self, request: &AllocationRequest) -> Result<AllocationPlan, AllocationError> {
        if request.total_stock <= 0 {
            return Err(AllocationError::NonPositiveTotal(request.total_stock));
        }

        let entries = normalize_entries(&request.allocations)?;
        let total = i64::from(request.total_stock);
        let online: Vec<&StoreAllocation> = entries
            .iter()
            .filter(|e| e.channel == AllocationChannel::Online)
            .collect();
        let physical: Vec<&StoreAllocation> = entries
            .iter()
            .filter(|e| e.channel == AllocationChannel::Physical)
            .collect();

        let store_inventory = match request.channel {
            FulfillmentChannel::Online => {
                if !physical.is_empty() {
                    warn!("rejecting physical stock on an online-only listing");
                    return Err(AllocationError::PhysicalStockOnOnlineListing);
                }
                if online.is_empty() {
                    StoreInventory(vec![StoreAllocation {
                        store_id: ONLINE_WAREHOUSE_ID.to_string(),
                        quantity: request.total_stock,
                        channel: AllocationChannel::Online,
                    }])
                } else {
                    require_exact_sum(&entries, total)?;
                    StoreInventory(entries)
                }
            }
            FulfillmentChannel::Physical => {
                if !online.is_empty() {
                    return Err(AllocationError::OnlineStockOnPhysicalListing);
                }
                if physical.is_empty() {
                    return Err(AllocationError::NoPhysicalAllocation);
                }
                require_exact_sum(&entries, total)?;
                StoreInventory(entries)
            }
            FulfillmentChannel::Both => {
                require_exact_sum(&entries, total)?;
                StoreInventory(entries)
            }
        };

        debug!(
            channel = request.channel.as_ref(),
            total_stock = request.total_stock,
            online = store_inventory.online_quantity(),
            physical = store_inventory.physical_quantity(),
            "allocation accepted"
        );

        Ok(AllocationPlan {
            channel: request.channel,
            total_stock: request.total_stock,
            store_inventory,
        })
    }
}

/// Trims ids, rejects negatives and duplicates, and drops zero-quantity rows.
fn normalize_entries(entries: &[AllocationEntry]) -> Result<Vec<StoreAllocation>, AllocationError> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut normalized = Vec::with_capacity(entries.len());

    for entry in entries {
        let store_id = entry.store_id.trim();
        if store_id.is_empty() {
            return Err(AllocationError::EmptyStoreId);
        }
        if entry.quantity < 0 {
            return Err(AllocationError::NegativeQuantity {
                store_id: store_id.to_string(),
                quantity: entry.quantity,
            });
        }
        if !seen.insert(store_id.to_ascii_lowercase()) {
            return Err(AllocationError::DuplicateStore(store_id.to_string()));
        }
        if entry.quantity > 0 {
            normalized.push(StoreAllocation {
                store_id: store_id.to_string(),
                quantity: entry.quantity,
                channel: entry.channel,
            });
        }
    }

    Ok(normalized)
}

fn require_exact_sum(entries: &[StoreAllocation], total: i64) -> Result<(), AllocationError> {
    let allocated: i64 = entries.iter().map(|e| i64::from(e.quantity)).sum();
    match allocated.cmp(&total) {
        std::cmp::Ordering::Equal => Ok(()),
        std::cmp::Ordering::Less => Err(AllocationError::Unallocated {
            remaining: total - allocated,
        }),
        std::cmp::Ordering::Greater => Err(AllocationError::OverAllocated {
            excess: allocated - total,
        }),
    }
}
