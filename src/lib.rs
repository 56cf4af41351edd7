//! Campus Market - Campus Marketplace Backend
//!
//! REST backend for a campus marketplace: user accounts, product listings,
//! orders with stock-safe checkout, per-user carts and third-party payment
//! integration.
//!
//! ## Features
//! - Product catalog with seller-owned stock
//! - Orders with append-only status history
//! - Payment initiation and gateway reconciliation (pull + push)
//! - Per-user carts in a keyed store
//! - Seller balances credited at checkout

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod reconcile;
pub mod store;

pub use error::{AppError, Result};
