//! In-memory shop table.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use localdeals_storage::{Shop, ShopStore, StorageError};

/// [`ShopStore`] backed by a DashMap keyed by shop ID.
#[derive(Clone, Debug, Default)]
pub struct InMemoryShopStore {
    shops: Arc<DashMap<i64, Shop>>,
}

impl InMemoryShopStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a shop row.
    pub fn insert_shop(&self, shop: Shop) {
        self.shops.insert(shop.id, shop);
    }

    /// Removes a shop row, returning it if present.
    pub fn remove_shop(&self, id: i64) -> Option<Shop> {
        self.shops.remove(&id).map(|(_, shop)| shop)
    }
}

#[async_trait]
impl ShopStore for InMemoryShopStore {
    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StorageError> {
        Ok(self.shops.get(&id).map(|shop| shop.value().clone()))
    }

    async fn update_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        match self.shops.get_mut(&shop.id) {
            Some(mut existing) => {
                *existing = shop.clone();
                Ok(())
            }
            None => Err(StorageError::not_found("shop", shop.id.to_string())),
        }
    }
}
