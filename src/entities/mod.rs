pub mod address;
pub mod cart_item;
pub mod order;
pub mod product;
pub mod return_request;

pub use address::Model as AddressModel;
pub use cart_item::{CartOwner, Model as CartItemModel};
pub use order::{Model as OrderModel, OrderItems, OrderLine, OrderStatus};
pub use product::{
    AllocationChannel, FulfillmentChannel, Model as ProductModel, StoreAllocation, StoreInventory,
};
pub use return_request::{Model as ReturnModel, ReturnStatus};
