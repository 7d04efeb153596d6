//! Typed documents and their normalizers.
//!
//! Remote documents are loosely shaped: fields go missing, items carry a generic `price` instead of unit/total prices,
//! users lack optional contact data. Every entity is normalized once, here, when it crosses the store boundary.

pub mod cart;
pub mod money;
pub mod order;
pub mod product;
pub mod timestamp;
pub mod user;

pub use cart::CartItem;
pub use order::NewOrder;
pub use order::NewOrderItem;
pub use order::Order;
pub use order::OrderItem;
pub use order::OrderStatus;
pub use order::StatusPolicy;
pub use product::Category;
pub use product::NewProduct;
pub use product::Product;
pub use product::ProductPatch;
pub use user::ProfilePatch;
pub use user::User;
pub use user::UserType;

use rust_decimal::Decimal;

pub(crate) fn non_negative(value: &Decimal, _ctx: &()) -> garde::Result {
    if value.is_sign_negative() && !value.is_zero() {
        Err(garde::Error::new(format!("{value} is negative")))
    }
    else {
        Ok(())
    }
}
