//! Producer-side product management and product lookups shared by other services.

use std::collections::HashMap;
use std::sync::Arc;

use harvestline_query::{Filter, Row, Table};
use serde_json::{Value, json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::{RemoteStore, decode_row, decode_rows, patch};
use crate::domain::entities::{ProductRecord, ProfileRecord};
use crate::domain::error::DomainError;
use crate::domain::types::UserRole;

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub price_cents: u64,
    pub stock: u32,
    pub unit: Option<String>,
    pub category_id: Option<Uuid>,
}

/// Load one product by id.
pub(crate) async fn find_product(
    store: &dyn RemoteStore,
    product_id: Uuid,
) -> Result<ProductRecord, AppError> {
    let mut rows = store
        .select(Table::Products, &[Filter::eq("id", product_id)])
        .await?;
    match rows.pop() {
        Some(row) => Ok(decode_row(row)?),
        None => Err(DomainError::not_found("product").into()),
    }
}

/// Load products by id; ids with no matching row are absent from the map.
pub(crate) async fn products_by_id(
    store: &dyn RemoteStore,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, ProductRecord>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = store
        .select(Table::Products, &[Filter::is_in("id", ids)])
        .await?;
    let products: Vec<ProductRecord> = decode_rows(rows)?;
    Ok(products
        .into_iter()
        .map(|product| (product.id, product))
        .collect())
}

#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn RemoteStore>,
}

impl ProductService {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn find(&self, product_id: Uuid) -> Result<ProductRecord, AppError> {
        find_product(self.store.as_ref(), product_id).await
    }

    /// Active products, optionally narrowed to one category.
    pub async fn list_active(&self, category_id: Option<Uuid>) -> Result<Vec<ProductRecord>, AppError> {
        let mut filters = vec![Filter::eq("is_active", true)];
        if let Some(category_id) = category_id {
            filters.push(Filter::eq("category_id", category_id));
        }
        let rows = self.store.select(Table::Products, &filters).await?;
        Ok(decode_rows(rows)?)
    }

    pub async fn list_for_seller(&self, seller_id: Uuid) -> Result<Vec<ProductRecord>, AppError> {
        let rows = self
            .store
            .select(Table::Products, &[Filter::eq("seller_id", seller_id)])
            .await?;
        Ok(decode_rows(rows)?)
    }

    #[instrument(skip(self, product), fields(seller = %seller_id))]
    pub async fn create(
        &self,
        seller_id: Uuid,
        product: NewProduct,
    ) -> Result<ProductRecord, AppError> {
        self.ensure_producer(seller_id).await?;

        let name = product.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("product name must not be empty").into());
        }
        if product.price_cents == 0 {
            return Err(DomainError::validation("price must be greater than zero").into());
        }

        let mut row = Row::new();
        row.insert("seller_id".to_string(), json!(seller_id));
        row.insert("name".to_string(), json!(name));
        row.insert("price_cents".to_string(), json!(product.price_cents));
        row.insert("stock".to_string(), json!(product.stock));
        row.insert(
            "unit".to_string(),
            json!(product.unit.as_deref().unwrap_or("unit")),
        );
        row.insert("category_id".to_string(), json!(product.category_id));
        row.insert("is_active".to_string(), Value::Bool(true));

        let inserted = self
            .store
            .insert(Table::Products, vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::unexpected("insert returned no product row"))?;
        let record: ProductRecord = decode_row(inserted)?;
        info!(product = %record.id, stock = record.stock, "Product created");
        Ok(record)
    }

    /// Set the stock level. Lowering it below cart quantities drives the cart auto-cap.
    #[instrument(skip(self), fields(seller = %seller_id, product = %product_id))]
    pub async fn update_stock(
        &self,
        seller_id: Uuid,
        product_id: Uuid,
        stock: u32,
    ) -> Result<ProductRecord, AppError> {
        self.patch_owned(seller_id, product_id, patch("stock", stock))
            .await
    }

    pub async fn update_price(
        &self,
        seller_id: Uuid,
        product_id: Uuid,
        price_cents: u64,
    ) -> Result<ProductRecord, AppError> {
        if price_cents == 0 {
            return Err(DomainError::validation("price must be greater than zero").into());
        }
        self.patch_owned(seller_id, product_id, patch("price_cents", price_cents))
            .await
    }

    pub async fn deactivate(
        &self,
        seller_id: Uuid,
        product_id: Uuid,
    ) -> Result<ProductRecord, AppError> {
        self.patch_owned(seller_id, product_id, patch("is_active", false))
            .await
    }

    async fn patch_owned(
        &self,
        seller_id: Uuid,
        product_id: Uuid,
        changes: Row,
    ) -> Result<ProductRecord, AppError> {
        let mut rows = self
            .store
            .update(
                Table::Products,
                &[
                    Filter::eq("id", product_id),
                    Filter::eq("seller_id", seller_id),
                ],
                changes,
            )
            .await?;
        match rows.pop() {
            Some(row) => Ok(decode_row(row)?),
            None => Err(DomainError::not_found("product").into()),
        }
    }

    async fn ensure_producer(&self, seller_id: Uuid) -> Result<(), AppError> {
        let mut rows = self
            .store
            .select(Table::Profiles, &[Filter::eq("id", seller_id)])
            .await?;
        let profile: ProfileRecord = match rows.pop() {
            Some(row) => decode_row(row)?,
            None => return Err(DomainError::not_found("profile").into()),
        };
        if profile.role != UserRole::Producer {
            return Err(DomainError::validation("only producers can list products").into());
        }
        Ok(())
    }
}
