//! Buyer/seller conversations.

use std::collections::HashMap;
use std::sync::Arc;

use harvestline_query::{Filter, Row, Table};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::{RemoteStore, decode_row, decode_rows, patch};
use crate::cache::CounterCache;
use crate::domain::entities::{ConversationRecord, MessageRecord};
use crate::domain::error::DomainError;

/// A conversation as listed in an inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationOverview {
    pub conversation: ConversationRecord,
    pub counterpart: Uuid,
    pub unread: u64,
    pub last_message: Option<MessageRecord>,
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn RemoteStore>,
    unread: Option<Arc<CounterCache>>,
}

impl MessageService {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            unread: None,
        }
    }

    /// Decrement this unread-conversations counter when the signed-in user reads a conversation.
    pub fn with_unread_counter(mut self, counter: Arc<CounterCache>) -> Self {
        self.unread = Some(counter);
        self
    }

    /// The buyer/seller conversation, reusing an existing one for the pair.
    #[instrument(skip(self), fields(buyer = %buyer_id, seller = %seller_id))]
    pub async fn start_conversation(
        &self,
        buyer_id: Uuid,
        seller_id: Uuid,
        product_id: Option<Uuid>,
    ) -> Result<ConversationRecord, AppError> {
        if buyer_id == seller_id {
            return Err(DomainError::validation("cannot start a conversation with yourself").into());
        }

        let existing = self
            .store
            .select(
                Table::Conversations,
                &[
                    Filter::eq("buyer_id", buyer_id),
                    Filter::eq("seller_id", seller_id),
                ],
            )
            .await?;
        if let Some(row) = existing.into_iter().next() {
            return Ok(decode_row(row)?);
        }

        let mut row = Row::new();
        row.insert("buyer_id".to_string(), json!(buyer_id));
        row.insert("seller_id".to_string(), json!(seller_id));
        row.insert("product_id".to_string(), json!(product_id));
        let inserted = self
            .store
            .insert(Table::Conversations, vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::unexpected("insert returned no conversation row"))?;
        Ok(decode_row(inserted)?)
    }

    pub async fn send(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<MessageRecord, AppError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(DomainError::validation("message body must not be empty").into());
        }
        let conversation = self.conversation(conversation_id).await?;
        if sender_id != conversation.buyer_id && sender_id != conversation.seller_id {
            return Err(DomainError::validation("sender is not part of this conversation").into());
        }

        let mut row = Row::new();
        row.insert("conversation_id".to_string(), json!(conversation_id));
        row.insert("sender_id".to_string(), json!(sender_id));
        row.insert(
            "recipient_id".to_string(),
            json!(conversation.counterpart(sender_id)),
        );
        row.insert("body".to_string(), json!(body));
        row.insert("read".to_string(), json!(false));

        let inserted = self
            .store
            .insert(Table::Messages, vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::unexpected("insert returned no message row"))?;
        Ok(decode_row(inserted)?)
    }

    /// Mark everything addressed to `reader` in a conversation as read.
    ///
    /// Returns how many messages changed. The unread counter drops by one
    /// before the write when the conversation had anything unread.
    pub async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64, AppError> {
        let filters = [
            Filter::eq("conversation_id", conversation_id),
            Filter::eq("recipient_id", reader_id),
            Filter::eq("read", false),
        ];
        let unread = self.store.select(Table::Messages, &filters).await?;
        if unread.is_empty() {
            return Ok(0);
        }

        if let Some(counter) = self.unread.as_ref() {
            counter.apply_delta(-1);
        }
        let updated = self
            .store
            .update(Table::Messages, &filters, patch("read", true))
            .await?;
        debug!(conversation = %conversation_id, marked = updated.len(), "Conversation read");
        Ok(updated.len() as u64)
    }

    /// Messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRecord>, AppError> {
        let rows = self
            .store
            .select(
                Table::Messages,
                &[Filter::eq("conversation_id", conversation_id)],
            )
            .await?;
        let mut messages: Vec<MessageRecord> = decode_rows(rows)?;
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }

    /// Every conversation `user_id` takes part in, most recently active first.
    pub async fn inbox(&self, user_id: Uuid) -> Result<Vec<ConversationOverview>, AppError> {
        let mut conversations: Vec<ConversationRecord> = Vec::new();
        for column in ["buyer_id", "seller_id"] {
            let rows = self
                .store
                .select(Table::Conversations, &[Filter::eq(column, user_id)])
                .await?;
            conversations.extend(decode_rows::<ConversationRecord>(rows)?);
        }
        if conversations.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
        let rows = self
            .store
            .select(Table::Messages, &[Filter::is_in("conversation_id", &ids)])
            .await?;
        let messages: Vec<MessageRecord> = decode_rows(rows)?;

        let mut by_conversation: HashMap<Uuid, Vec<MessageRecord>> = HashMap::new();
        for message in messages {
            by_conversation
                .entry(message.conversation_id)
                .or_default()
                .push(message);
        }

        let mut overviews: Vec<ConversationOverview> = conversations
            .into_iter()
            .map(|conversation| {
                let thread = by_conversation.remove(&conversation.id).unwrap_or_default();
                let unread = thread
                    .iter()
                    .filter(|message| message.recipient_id == user_id && !message.read)
                    .count() as u64;
                let last_message = thread.into_iter().max_by_key(|message| message.created_at);
                ConversationOverview {
                    counterpart: conversation.counterpart(user_id),
                    conversation,
                    unread,
                    last_message,
                }
            })
            .collect();
        overviews.sort_by(|a, b| {
            let a = a.last_message.as_ref().map(|message| message.created_at);
            let b = b.last_message.as_ref().map(|message| message.created_at);
            b.cmp(&a)
        });
        Ok(overviews)
    }

    async fn conversation(&self, conversation_id: Uuid) -> Result<ConversationRecord, AppError> {
        match self
            .store
            .select(Table::Conversations, &[Filter::eq("id", conversation_id)])
            .await?
            .pop()
        {
            Some(row) => Ok(decode_row(row)?),
            None => Err(DomainError::not_found("conversation").into()),
        }
    }
}
