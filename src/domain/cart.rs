//! Cart lines, seller groups and totals.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::entities::{CartItemRecord, ProductRecord};

/// A cart item joined with the product it refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub item: CartItemRecord,
    pub product: ProductRecord,
}

impl CartLine {
    pub fn seller_id(&self) -> Uuid {
        self.product.seller_id
    }

    pub fn subtotal_cents(&self) -> u64 {
        self.product
            .price_cents
            .saturating_mul(u64::from(self.item.quantity))
    }

    /// Quantity the line should be reduced to, when it exceeds current stock.
    pub fn stock_cap(&self) -> Option<u32> {
        (self.item.quantity > self.product.stock).then_some(self.product.stock)
    }
}

/// Lines of one cart that come from the same seller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellerGroup {
    pub seller_id: Uuid,
    pub lines: Vec<CartLine>,
}

impl SellerGroup {
    pub fn quantity(&self) -> u64 {
        self.lines
            .iter()
            .map(|line| u64::from(line.item.quantity))
            .sum()
    }

    pub fn subtotal_cents(&self) -> u64 {
        self.lines.iter().map(CartLine::subtotal_cents).sum()
    }
}

/// Cart totals, with lines partitioned by seller in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CartSummary {
    pub groups: Vec<SellerGroup>,
    pub total_items: u64,
    pub total_cents: u64,
}

impl CartSummary {
    pub fn from_lines(lines: &[CartLine]) -> Self {
        let mut groups: Vec<SellerGroup> = Vec::new();
        for line in lines {
            let seller_id = line.seller_id();
            match groups.iter_mut().find(|group| group.seller_id == seller_id) {
                Some(group) => group.lines.push(line.clone()),
                None => groups.push(SellerGroup {
                    seller_id,
                    lines: vec![line.clone()],
                }),
            }
        }

        let total_items = groups.iter().map(SellerGroup::quantity).sum();
        let total_cents = groups.iter().map(SellerGroup::subtotal_cents).sum();

        Self {
            groups,
            total_items,
            total_cents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, seller_id: Uuid) -> Option<&SellerGroup> {
        self.groups.iter().find(|group| group.seller_id == seller_id)
    }

    pub fn seller_ids(&self) -> Vec<Uuid> {
        self.groups.iter().map(|group| group.seller_id).collect()
    }
}
