//! Domain entities mirrored from rows of the hosted store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{DeliveryMethod, OrderStatus, UserRole};

const DEFAULT_MIN_ORDER_QUANTITY: u32 = 1;

fn default_min_order_quantity() -> u32 {
    DEFAULT_MIN_ORDER_QUANTITY
}

fn default_unit() -> String {
    "unit".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub farm_name: Option<String>,
    /// Minimum combined quantity per order before delivery is offered.
    #[serde(default = "default_min_order_quantity")]
    pub min_order_quantity: u32,
    /// Delivery orders accepted per UTC day. `Some(0)` disables delivery, `None` is unlimited.
    #[serde(default)]
    pub daily_delivery_cap: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    pub price_cents: u64,
    pub stock: u32,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartRecord {
    pub id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItemRecord {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub status: OrderStatus,
    pub delivery_method: DeliveryMethod,
    pub total_cents: u64,
    #[serde(default)]
    pub items: Vec<OrderLine>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    #[serde(default)]
    pub product_id: Option<Uuid>,
}

impl ConversationRecord {
    /// The participant that is not `user_id`.
    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if self.buyer_id == user_id {
            self.seller_id
        } else {
            self.buyer_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn profile_defaults_apply_when_columns_are_absent() {
        let profile: ProfileRecord = serde_json::from_value(json!({
            "id": Uuid::nil(),
            "display_name": "Hollow Creek",
        }))
        .unwrap();

        assert_eq!(profile.role, UserRole::Buyer);
        assert_eq!(profile.min_order_quantity, 1);
        assert_eq!(profile.daily_delivery_cap, None);
    }

    #[test]
    fn order_created_at_reads_rfc3339() {
        let order: OrderRecord = serde_json::from_value(json!({
            "id": Uuid::nil(),
            "buyer_id": Uuid::nil(),
            "seller_id": Uuid::nil(),
            "status": "pending",
            "delivery_method": "delivery",
            "total_cents": 1250,
            "created_at": "2026-10-19T08:30:00Z",
        }))
        .unwrap();

        assert_eq!(order.created_at.hour(), 8);
        assert!(order.items.is_empty());
    }

    #[test]
    fn counterpart_picks_the_other_participant() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let conversation = ConversationRecord {
            id: Uuid::new_v4(),
            buyer_id: buyer,
            seller_id: seller,
            product_id: None,
        };
        assert_eq!(conversation.counterpart(buyer), seller);
        assert_eq!(conversation.counterpart(seller), buyer);
    }
}
