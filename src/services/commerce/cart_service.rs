use crate::{
    entities::commerce::{
        cart_line, CartLine, CartOwnerKind, CatalogItem, CatalogItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::catalog_service::require_active_on,
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Who a cart belongs to: a guest session token or a signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum CartOwner {
    Session(String),
    Identity(Uuid),
}

impl CartOwner {
    pub fn kind(&self) -> CartOwnerKind {
        match self {
            Self::Session(_) => CartOwnerKind::Session,
            Self::Identity(_) => CartOwnerKind::Identity,
        }
    }

    pub fn owner_ref(&self) -> String {
        match self {
            Self::Session(token) => token.clone(),
            Self::Identity(id) => id.to_string(),
        }
    }

    /// `session:<token>` or `identity:<uuid>`
    pub fn encode(&self) -> String {
        match self {
            Self::Session(token) => format!("session:{}", token),
            Self::Identity(id) => format!("identity:{}", id),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once(':')? {
            ("session", token) if !token.is_empty() => Some(Self::Session(token.to_string())),
            ("identity", id) => Uuid::parse_str(id).ok().map(Self::Identity),
            _ => None,
        }
    }
}

impl fmt::Display for CartOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Cart contents with catalog details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub items: Vec<CatalogItemModel>,
    pub subtotal: i64,
    /// Shared currency of the lines; `None` when empty or mixed
    pub currency: Option<String>,
}

impl CartView {
    fn from_items(items: Vec<CatalogItemModel>) -> Self {
        let subtotal = items.iter().map(|item| item.amount).sum();
        let currency = items.first().map(|first| first.currency.clone()).filter(|currency| {
            items
                .iter()
                .all(|item| item.currency.eq_ignore_ascii_case(currency))
        });
        Self {
            items,
            subtotal,
            currency,
        }
    }

    pub fn item_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|item| item.id).collect()
    }
}

/// Cart of catalog item references, keyed by an explicit [`CartOwner`].
///
/// Every catalog kind is single-unit per owner, so adding an item that is
/// already in the cart is a no-op and lines always carry quantity 1. The
/// `(owner_kind, owner_ref, catalog_item_id)` unique index makes concurrent
/// adds converge on one line.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds an active catalog item to the owner's cart.
    ///
    /// # Returns
    ///
    /// * `Ok(CartView)` - The cart after the add
    /// * `Err(ServiceError::ItemInactive)` - Unknown or inactive item
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        catalog_item_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        require_active_on(&*self.db, &[catalog_item_id]).await?;

        let line = cart_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_kind: Set(owner.kind()),
            owner_ref: Set(owner.owner_ref()),
            catalog_item_id: Set(catalog_item_id),
            quantity: Set(1),
            created_at: Set(Utc::now()),
        };

        let inserted = CartLine::insert(line)
            .on_conflict(
                OnConflict::columns([
                    cart_line::Column::OwnerKind,
                    cart_line::Column::OwnerRef,
                    cart_line::Column::CatalogItemId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        if inserted > 0 {
            self.event_sender
                .send_or_log(Event::CartItemAdded {
                    owner: owner.encode(),
                    catalog_item_id,
                })
                .await;
            info!("Added catalog item {} to cart", catalog_item_id);
        }

        self.list(owner).await
    }

    /// Removes one item. Returns whether a line existed.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        catalog_item_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let removed = self.remove_items(owner, &[catalog_item_id]).await? > 0;
        if removed {
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    owner: owner.encode(),
                    catalog_item_id,
                })
                .await;
        }
        Ok(removed)
    }

    /// Removes the given items, returning how many lines were deleted.
    pub async fn remove_items(
        &self,
        owner: &CartOwner,
        catalog_item_ids: &[Uuid],
    ) -> Result<u64, ServiceError> {
        if catalog_item_ids.is_empty() {
            return Ok(0);
        }
        let result = CartLine::delete_many()
            .filter(cart_line::Column::OwnerKind.eq(owner.kind()))
            .filter(cart_line::Column::OwnerRef.eq(owner.owner_ref()))
            .filter(cart_line::Column::CatalogItemId.is_in(catalog_item_ids.iter().copied()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &CartOwner) -> Result<u64, ServiceError> {
        let result = CartLine::delete_many()
            .filter(cart_line::Column::OwnerKind.eq(owner.kind()))
            .filter(cart_line::Column::OwnerRef.eq(owner.owner_ref()))
            .exec(&*self.db)
            .await?;
        info!("Cleared {} cart lines", result.rows_affected);
        Ok(result.rows_affected)
    }

    /// Lists the cart in insertion order.
    pub async fn list(&self, owner: &CartOwner) -> Result<CartView, ServiceError> {
        let rows = CartLine::find()
            .filter(cart_line::Column::OwnerKind.eq(owner.kind()))
            .filter(cart_line::Column::OwnerRef.eq(owner.owner_ref()))
            .order_by_asc(cart_line::Column::CreatedAt)
            .find_also_related(CatalogItem)
            .all(&*self.db)
            .await?;

        let items = rows
            .into_iter()
            .filter_map(|(line, item)| {
                if item.is_none() {
                    warn!(line_id = %line.id, "Cart line references a missing catalog item");
                }
                item
            })
            .collect();

        Ok(CartView::from_items(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_encoding_is_reversible() {
        let id = Uuid::new_v4();
        for owner in [
            CartOwner::Session("tok:with:colons".into()),
            CartOwner::Identity(id),
        ] {
            assert_eq!(CartOwner::parse(&owner.encode()), Some(owner));
        }
    }

    #[test]
    fn malformed_owner_strings_are_rejected() {
        assert_eq!(CartOwner::parse("session:"), None);
        assert_eq!(CartOwner::parse("identity:nope"), None);
        assert_eq!(CartOwner::parse("guest:abc"), None);
        assert_eq!(CartOwner::parse("no-separator"), None);
    }
}
