pub mod addresses;
pub mod cart;
pub mod common;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod products;
pub mod returns;

use axum::Router;

use crate::{
    auth::{roles::SELLER_ROLES, AuthRouterExt},
    AppState,
};

/// Every `/api` route, grouped by who may call it.
pub fn api_routes() -> Router<AppState> {
    // Guest-friendly groups still reject malformed tokens; handlers that need
    // a signed-in caller take `CurrentUser`.
    let storefront = Router::new()
        .merge(products::routes())
        .merge(cart::routes())
        .merge(orders::routes())
        .merge(returns::routes())
        .merge(addresses::routes())
        .with_optional_auth();

    let seller = inventory::routes().with_any_role(SELLER_ROLES);

    Router::new()
        .merge(storefront)
        .nest("/inventory", seller)
}
