//! Per-seller delivery eligibility.
//!
//! A seller group qualifies for delivery when its combined quantity meets the
//! seller's minimum order quantity and the seller has not yet accepted its daily
//! quota of delivery orders. A daily cap of zero switches delivery off.

use serde::Serialize;
use time::{Duration, OffsetDateTime, Time, UtcOffset};
use uuid::Uuid;

use crate::domain::entities::ProfileRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryPolicy {
    pub min_order_quantity: u32,
    pub daily_delivery_cap: Option<u32>,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            min_order_quantity: 1,
            daily_delivery_cap: None,
        }
    }
}

impl From<&ProfileRecord> for DeliveryPolicy {
    fn from(profile: &ProfileRecord) -> Self {
        Self {
            min_order_quantity: profile.min_order_quantity,
            daily_delivery_cap: profile.daily_delivery_cap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeliveryBlocker {
    Disabled,
    BelowMinimum { required: u32, actual: u64 },
    DailyCapReached { cap: u32, today: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryEligibility {
    pub seller_id: Uuid,
    pub quantity: u64,
    pub todays_orders: u64,
    pub blockers: Vec<DeliveryBlocker>,
}

impl DeliveryEligibility {
    pub fn is_eligible(&self) -> bool {
        self.blockers.is_empty()
    }
}

/// Evaluate both thresholds independently and report every blocker that applies.
pub fn evaluate(
    seller_id: Uuid,
    policy: DeliveryPolicy,
    quantity: u64,
    todays_orders: u64,
) -> DeliveryEligibility {
    let mut blockers = Vec::new();

    match policy.daily_delivery_cap {
        Some(0) => blockers.push(DeliveryBlocker::Disabled),
        Some(cap) if todays_orders >= u64::from(cap) => {
            blockers.push(DeliveryBlocker::DailyCapReached {
                cap,
                today: todays_orders,
            });
        }
        _ => {}
    }

    if quantity < u64::from(policy.min_order_quantity) {
        blockers.push(DeliveryBlocker::BelowMinimum {
            required: policy.min_order_quantity,
            actual: quantity,
        });
    }

    DeliveryEligibility {
        seller_id,
        quantity,
        todays_orders,
        blockers,
    }
}

/// First and last instant of the UTC day containing `now`.
pub fn utc_day_bounds(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let start = now.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT);
    let end = start + Duration::DAY - Duration::MILLISECOND;
    (start, end)
}
