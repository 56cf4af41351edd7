//! Per-user cart contents.
//!
//! Cart state lives in a keyed database row, never in process memory, so it
//! survives restarts and multi-instance deployments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cart {
    pub user_id: Uuid,
    pub items: Json<Vec<CartItem>>,
    pub updated_at: DateTime<Utc>,
}

/// Merge a client-side cart into the server cart. Server items keep their
/// position; overlapping product ids add quantities; new items append.
pub fn merge_items(server: Vec<CartItem>, local: Vec<CartItem>) -> Vec<CartItem> {
    let mut merged = server;
    for item in local {
        if let Some(existing) = merged.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity += item.quantity;
        } else {
            merged.push(item);
        }
    }
    merged
}
