//! FakeStore API wire types

use bigdecimal::BigDecimal;
use favcache_core::{CachedProduct, CatalogError, ProductId, Review, Timestamp};
use serde::Deserialize;
use std::str::FromStr;

/// Product body returned by `GET /products/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FakeStoreProduct {
    pub id: ProductId,
    pub title: String,
    pub price: serde_json::Number,
    pub image: String,
    #[serde(default)]
    pub rating: Option<FakeStoreRating>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FakeStoreRating {
    pub rate: serde_json::Number,
    pub count: u32,
}

impl FakeStoreProduct {
    /// Convert into a cache record stamped with `fetched_at`.
    pub fn into_product(self, fetched_at: Timestamp) -> Result<CachedProduct, CatalogError> {
        let price = decimal("price", &self.price)?;
        if price < BigDecimal::from(0) {
            return Err(malformed(format!("negative price {}", price)));
        }

        let review = match self.rating {
            Some(rating) => Some(Review::new(decimal("rating.rate", &rating.rate)?, rating.count)),
            None => None,
        };

        Ok(CachedProduct::new(
            self.id,
            self.title,
            self.image,
            price,
            review,
            fetched_at,
        ))
    }
}

fn decimal(field: &str, number: &serde_json::Number) -> Result<BigDecimal, CatalogError> {
    BigDecimal::from_str(&number.to_string())
        .map_err(|e| malformed(format!("{} is not a decimal ({}): {}", field, number, e)))
}

fn malformed(reason: String) -> CatalogError {
    CatalogError::Malformed { reason }
}
