//! Remote API client.
//!
//! [`RemoteClient`] is the seam between the job engine and the network. The
//! production implementation is [`HttpClient`], which routes every call
//! through the shared [`RateLimiter`](crate::ratelimit::RateLimiter) under a
//! per-endpoint bucket key.

mod client;
mod error;
mod models;

use async_trait::async_trait;
pub use client::HttpClient;
pub use error::*;
pub use models::*;

/// Bucket key helpers. Calls sharing a key are serialised by the limiter.
pub mod buckets {
    pub const IDENTITY: &str = "identity";
    pub const COMMUNITIES: &str = "communities";
    pub const CONVERSATIONS: &str = "conversations";

    pub fn search(scope_id: &str) -> String {
        format!("search:{scope_id}")
    }

    pub fn history(channel_id: &str) -> String {
        format!("history:{channel_id}")
    }

    pub fn delete(channel_id: &str) -> String {
        format!("delete:{channel_id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Timestamp,
    Relevance,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Relevance => "relevance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Author-scoped message search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub author_id: String,
    pub offset: u64,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    /// Only messages with an id greater than this.
    pub min_id: Option<String>,
    /// Only messages with an id lower than this.
    pub max_id: Option<String>,
}

impl SearchQuery {
    pub fn by_author(author_id: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            offset: 0,
            sort_by: None,
            sort_order: None,
            min_id: None,
            max_id: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn sorted(mut self, by: SortBy, order: SortOrder) -> Self {
        self.sort_by = Some(by);
        self.sort_order = Some(order);
        self
    }

    pub fn between(mut self, min_id: Option<String>, max_id: Option<String>) -> Self {
        self.min_id = min_id;
        self.max_id = max_id;
        self
    }

    /// Query string pairs, in a stable order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("author_id", self.author_id.clone()),
            ("offset", self.offset.to_string()),
        ];
        if let Some(sort_by) = self.sort_by {
            pairs.push(("sort_by", sort_by.as_str().to_string()));
        }
        if let Some(order) = self.sort_order {
            pairs.push(("sort_order", order.as_str().to_string()));
        }
        if let Some(min_id) = &self.min_id {
            pairs.push(("min_id", min_id.clone()));
        }
        if let Some(max_id) = &self.max_id {
            pairs.push(("max_id", max_id.clone()));
        }
        pairs
    }
}

/// Position for chronological channel paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryCursor {
    Latest,
    Before(String),
    After(String),
    Around(String),
}

impl HistoryCursor {
    pub(crate) fn as_pair(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::Latest => None,
            Self::Before(id) => Some(("before", id)),
            Self::After(id) => Some(("after", id)),
            Self::Around(id) => Some(("around", id)),
        }
    }
}

/// Largest page the history endpoint serves.
pub const MAX_HISTORY_LIMIT: u8 = 100;

/// Why a delete ended without removing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Permission,
    NotFound,
}

impl SkipReason {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Permission => FailureCategory::Permission,
            Self::NotFound => FailureCategory::NotFound,
        }
    }
}

/// Result of a delete that did not raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The message is already gone or inaccessible.
    Skipped(SkipReason),
}

/// Authenticated access to the remote API.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Replace the credential used for subsequent calls.
    fn set_credential(&self, credential: String);

    fn has_credential(&self) -> bool;

    async fn current_user(&self) -> ApiResult<User>;

    async fn list_communities(&self) -> ApiResult<Vec<Community>>;

    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>>;

    /// One page of the user's messages in a community.
    async fn search_community(&self, community_id: &str, query: &SearchQuery)
    -> ApiResult<SearchPage>;

    /// One page of the user's messages in a conversation.
    async fn search_conversation(
        &self,
        conversation_id: &str,
        query: &SearchQuery,
    ) -> ApiResult<SearchPage>;

    /// Chronological page of a channel, independent of the search index.
    async fn channel_history(
        &self,
        channel_id: &str,
        cursor: &HistoryCursor,
        limit: u8,
    ) -> ApiResult<Vec<Message>>;

    /// Delete one message. 403 and 404 are reported as skips, not errors.
    async fn delete_message(&self, channel_id: &str, message_id: &str)
    -> ApiResult<DeleteOutcome>;
}
