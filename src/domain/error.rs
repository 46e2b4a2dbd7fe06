use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("delivery unavailable for seller {seller_id}: {reason}")]
    DeliveryUnavailable { seller_id: uuid::Uuid, reason: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn delivery_unavailable(seller_id: uuid::Uuid, reason: impl Into<String>) -> Self {
        Self::DeliveryUnavailable {
            seller_id,
            reason: reason.into(),
        }
    }
}
