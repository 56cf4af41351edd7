//! Domain model: orders, payments, products, carts and the events they raise.

pub mod cart;
pub mod events;
pub mod order;
pub mod payment;
pub mod product;
pub mod user;

pub use cart::{merge_items, Cart, CartItem};
pub use events::DomainEvent;
pub use order::{
    NewOrderItem, Order, OrderItem, OrderPaymentStatus, OrderStatus, OrderStatusEntry,
    ShippingAddress,
};
pub use payment::{Payment, PaymentMethod, PaymentStatus, ReceiptDetails, SettledPayment};
pub use product::{Product, ProductStatus};
pub use user::User;
