use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purchasable catalog item. Prices are integer minor currency units.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalog_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub kind: ItemKind,
    pub event_year: i32,
    pub amount: i64,
    pub currency: String,
    /// Which replay or session this item unlocks, if any
    #[sea_orm(nullable)]
    pub content_ref: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_line::Entity")]
    CartLines,
    #[sea_orm(has_many = "super::entitlement::Entity")]
    Entitlements,
}

impl Related<super::cart_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartLines.def()
    }
}

impl Related<super::entitlement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entitlements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Catalog item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[sea_orm(string_value = "ticket")]
    Ticket,
    #[sea_orm(string_value = "individual_replay")]
    IndividualReplay,
    #[sea_orm(string_value = "year_bundle")]
    YearBundle,
}

impl ItemKind {
    /// Whether a purchase of this kind grants the whole event year.
    pub fn grants_bundle(&self) -> bool {
        matches!(self, Self::YearBundle)
    }

    /// Whether a bundle entitlement for the item's year also covers this kind.
    pub fn covered_by_bundle(&self) -> bool {
        matches!(self, Self::IndividualReplay | Self::YearBundle)
    }
}
