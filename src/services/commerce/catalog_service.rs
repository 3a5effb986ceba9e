use crate::{
    entities::commerce::{catalog_item, CatalogItem, CatalogItemModel},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read-only view of purchasable items.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Active items, newest event year first.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<CatalogItemModel>, ServiceError> {
        Ok(CatalogItem::find()
            .filter(catalog_item::Column::Active.eq(true))
            .order_by_desc(catalog_item::Column::EventYear)
            .order_by_asc(catalog_item::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<CatalogItemModel, ServiceError> {
        CatalogItem::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Catalog item {} not found", id)))
    }
}

/// Loads items regardless of active state; unknown ids are absent from the map.
pub(crate) async fn find_many_on<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, CatalogItemModel>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(CatalogItem::find()
        .filter(catalog_item::Column::Id.is_in(ids.iter().copied()))
        .all(conn)
        .await?
        .into_iter()
        .map(|item| (item.id, item))
        .collect())
}

/// Loads every id and fails with `ItemInactive` on the first unknown or inactive one.
///
/// `ids` must be distinct; results keep their order.
pub(crate) async fn require_active_on<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<Vec<CatalogItemModel>, ServiceError> {
    let mut found = find_many_on(conn, ids).await?;

    ids.iter()
        .map(|id| match found.remove(id) {
            Some(item) if item.active => Ok(item),
            _ => Err(ServiceError::ItemInactive(*id)),
        })
        .collect()
}
