// Domain services: the only place business rules live. Handlers and the CLI
// call into these and never mutate entities directly.
pub mod addresses;
pub mod allocation;
pub mod cart;
pub mod checkout;
pub mod invalidation;
pub mod order_lifecycle;
pub mod pricing;
pub mod products;
pub mod returns;

use std::sync::Arc;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::order::Model as OrderModel,
    events::EventSender,
};

use self::{
    addresses::AddressService, cart::CartService, checkout::CheckoutService,
    order_lifecycle::OrderLifecycleService, products::ProductService, returns::ReturnService,
};

/// The authenticated caller as seen by services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    /// Sellers may act on any customer's orders
    pub is_seller: bool,
}

impl Requester {
    /// Sellers see every order; customers only their own.
    pub fn can_access(&self, order: &OrderModel) -> bool {
        self.is_seller || order.is_owned_by(&self.user_id)
    }
}

impl From<&AuthUser> for Requester {
    fn from(user: &AuthUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            is_seller: user.is_seller(),
        }
    }
}

/// Service container shared by the router and the CLI.
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<ProductService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub lifecycle: Arc<OrderLifecycleService>,
    pub returns: Arc<ReturnService>,
    pub addresses: Arc<AddressService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            products: Arc::new(ProductService::new(db.clone(), event_sender.clone())),
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(db.clone(), event_sender.clone())),
            lifecycle: Arc::new(OrderLifecycleService::new(db.clone(), event_sender.clone())),
            returns: Arc::new(ReturnService::new(db.clone(), event_sender.clone())),
            addresses: Arc::new(AddressService::new(db, event_sender)),
        }
    }
}
