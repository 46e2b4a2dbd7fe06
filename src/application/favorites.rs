use std::sync::Arc;

use harvestline_query::{Filter, Row, Table};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::products::{find_product, products_by_id};
use crate::application::repos::{RemoteStore, decode_rows};
use crate::domain::entities::{FavoriteRecord, ProductRecord};

#[derive(Clone)]
pub struct FavoritesService {
    store: Arc<dyn RemoteStore>,
}

impl FavoritesService {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn is_favorite(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, AppError> {
        let rows = self
            .store
            .select(Table::Favorites, &Self::filters(user_id, product_id))
            .await?;
        Ok(!rows.is_empty())
    }

    /// Flip the favorite flag. Returns whether the product is now a favorite.
    pub async fn toggle(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, AppError> {
        let filters = Self::filters(user_id, product_id);
        let removed = self.store.delete(Table::Favorites, &filters).await?;
        if removed > 0 {
            debug!(user = %user_id, product = %product_id, "Favorite removed");
            return Ok(false);
        }

        find_product(self.store.as_ref(), product_id).await?;
        let mut row = Row::new();
        row.insert("user_id".to_string(), json!(user_id));
        row.insert("product_id".to_string(), json!(product_id));
        self.store.insert(Table::Favorites, vec![row]).await?;
        debug!(user = %user_id, product = %product_id, "Favorite added");
        Ok(true)
    }

    /// Favorite products that still exist, in the order they were favorited.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ProductRecord>, AppError> {
        let rows = self
            .store
            .select(Table::Favorites, &[Filter::eq("user_id", user_id)])
            .await?;
        let favorites: Vec<FavoriteRecord> = decode_rows(rows)?;
        let ids: Vec<Uuid> = favorites.iter().map(|favorite| favorite.product_id).collect();
        let mut products = products_by_id(self.store.as_ref(), &ids).await?;
        Ok(ids.iter().filter_map(|id| products.remove(id)).collect())
    }

    fn filters(user_id: Uuid, product_id: Uuid) -> [Filter; 2] {
        [
            Filter::eq("user_id", user_id),
            Filter::eq("product_id", product_id),
        ]
    }
}
