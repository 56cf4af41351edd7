//! Product listing with seller-owned stock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "product_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Sold,
    Hidden,
    Deleted,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub currency: String,
    pub stock: i32,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn has_stock(&self, quantity: i32) -> bool {
        self.status == ProductStatus::Active && self.stock >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_check_respects_status() {
        let now = Utc::now();
        let mut p = Product {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            name: "Desk lamp".into(),
            description: None,
            price: 800,
            currency: "KES".into(),
            stock: 3,
            status: ProductStatus::Active,
            created_at: now,
            updated_at: now,
        };
        assert!(p.has_stock(3));
        assert!(!p.has_stock(4));
        p.status = ProductStatus::Hidden;
        assert!(!p.has_stock(1));
    }
}
