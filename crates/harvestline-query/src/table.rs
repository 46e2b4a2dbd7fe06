use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tables exposed by the hosted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Products,
    Categories,
    Carts,
    CartItems,
    Favorites,
    Orders,
    Conversations,
    Messages,
    Reviews,
    FarmingGuides,
    Crops,
}

impl Table {
    pub const ALL: [Table; 12] = [
        Table::Profiles,
        Table::Products,
        Table::Categories,
        Table::Carts,
        Table::CartItems,
        Table::Favorites,
        Table::Orders,
        Table::Conversations,
        Table::Messages,
        Table::Reviews,
        Table::FarmingGuides,
        Table::Crops,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Products => "products",
            Table::Categories => "categories",
            Table::Carts => "carts",
            Table::CartItems => "cart_items",
            Table::Favorites => "favorites",
            Table::Orders => "orders",
            Table::Conversations => "conversations",
            Table::Messages => "messages",
            Table::Reviews => "reviews",
            Table::FarmingGuides => "farming_guides",
            Table::Crops => "crops",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown table `{0}`")]
pub struct ParseTableError(pub String);

impl FromStr for Table {
    type Err = ParseTableError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // `users` is the legacy name of the profiles table.
        if value == "users" {
            return Ok(Table::Profiles);
        }
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == value)
            .ok_or_else(|| ParseTableError(value.to_string()))
    }
}
