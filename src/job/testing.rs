//! Scripted [`RemoteClient`] and controller fixtures for job tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::JobController;
use crate::{
    api::{
        ApiError, ApiResult, Community, Conversation, DeleteOutcome, HistoryCursor, Message,
        RemoteClient, SearchPage, SearchQuery, User,
    },
    config::JobConfig,
    events::StateBroadcaster,
    job::Checkpoint,
    store::{CHECKPOINT_KEY, KeyValueStore, MemoryStore, StoreError, StoreResult},
};

/// Hits per search page, as the real endpoint serves them.
const PAGE_SIZE: usize = 25;

#[derive(Default)]
struct FakeState {
    communities: Vec<Community>,
    conversations: Vec<Conversation>,
    /// Live messages per community or conversation id.
    messages: HashMap<String, Vec<Message>>,
    search_errors: HashMap<String, ApiError>,
    identity_error: Option<ApiError>,
    /// Number of upcoming searches per scope that return no hits.
    empty_pages: HashMap<String, u32>,
    delete_scripts: HashMap<String, ApiResult<DeleteOutcome>>,
    search_calls: Vec<(String, u64)>,
    deleted: Vec<String>,
    next_id: u64,
}

/// In-memory stand-in for the remote service.
///
/// Searches return the authored messages still present in a scope. Deletes
/// take `delete_latency` of (virtual) time, which stands in for rate limiter
/// pacing.
pub(crate) struct FakeRemote {
    user_id: String,
    credential: Mutex<Option<String>>,
    delete_latency: Duration,
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            credential: Mutex::new(None),
            delete_latency: Duration::from_millis(100),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_community(self, community: Community, count: usize) -> Self {
        let id = community.id.clone();
        self.state.lock().communities.push(community);
        self.add_messages(&id, count);
        self
    }

    pub fn with_conversation(self, conversation: Conversation, count: usize) -> Self {
        let id = conversation.id.clone();
        self.state.lock().conversations.push(conversation);
        self.add_messages(&id, count);
        self
    }

    /// Add `count` messages authored by the user to `scope_id`.
    pub fn add_messages(&self, scope_id: &str, count: usize) -> Vec<String> {
        let author = self.user();
        self.push_messages(scope_id, author, count)
    }

    /// Add messages by someone else; searches still return them.
    pub fn add_foreign_messages(&self, scope_id: &str, count: usize) -> Vec<String> {
        let author = User {
            id: format!("not-{}", self.user_id),
            username: "someone".into(),
            discriminator: None,
            avatar: None,
            global_name: None,
        };
        self.push_messages(scope_id, author, count)
    }

    /// Remove `count` messages from `scope_id` without a delete call, as if
    /// they were deleted elsewhere.
    pub fn drop_messages(&self, scope_id: &str, count: usize) {
        if let Some(messages) = self.state.lock().messages.get_mut(scope_id) {
            let count = count.min(messages.len());
            messages.drain(..count);
        }
    }

    pub fn fail_search(&self, scope_id: &str, error: ApiError) {
        self.state
            .lock()
            .search_errors
            .insert(scope_id.to_string(), error);
    }

    pub fn clear_search_failure(&self, scope_id: &str) {
        self.state.lock().search_errors.remove(scope_id);
    }

    pub fn fail_identity(&self, error: ApiError) {
        self.state.lock().identity_error = Some(error);
    }

    /// Make the next `pages` searches in `scope_id` come back empty.
    pub fn lag_search(&self, scope_id: &str, pages: u32) {
        self.state
            .lock()
            .empty_pages
            .insert(scope_id.to_string(), pages);
    }

    /// Fix the outcome of deleting `message_id`. Only `Deleted` removes it.
    pub fn script_delete(&self, message_id: &str, outcome: ApiResult<DeleteOutcome>) {
        self.state
            .lock()
            .delete_scripts
            .insert(message_id.to_string(), outcome);
    }

    /// Every search issued, as `(scope id, offset)`.
    pub fn search_calls(&self) -> Vec<(String, u64)> {
        self.state.lock().search_calls.clone()
    }

    /// Ids of messages deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn remaining(&self, scope_id: &str) -> usize {
        self.state
            .lock()
            .messages
            .get(scope_id)
            .map_or(0, |messages| messages.len())
    }

    fn user(&self) -> User {
        User {
            id: self.user_id.clone(),
            username: "tester".into(),
            discriminator: None,
            avatar: None,
            global_name: None,
        }
    }

    fn push_messages(&self, scope_id: &str, author: User, count: usize) -> Vec<String> {
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_id += 1;
            let id = format!("m{}", state.next_id);
            ids.push(id.clone());
            let message = Message {
                id,
                channel_id: format!("{scope_id}-chan"),
                author: author.clone(),
                content: "hello".into(),
                timestamp: String::new(),
                kind: 0,
            };
            state
                .messages
                .entry(scope_id.to_string())
                .or_default()
                .push(message);
        }
        ids
    }

    fn search(&self, scope_id: &str, query: &SearchQuery) -> ApiResult<SearchPage> {
        let mut state = self.state.lock();
        state
            .search_calls
            .push((scope_id.to_string(), query.offset));

        if let Some(error) = state.search_errors.get(scope_id) {
            return Err(error.clone());
        }

        let live = state.messages.get(scope_id).cloned().unwrap_or_default();
        let total_results = live
            .iter()
            .filter(|m| m.author.id == query.author_id)
            .count() as u64;

        if let Some(pages) = state.empty_pages.get_mut(scope_id)
            && *pages > 0
        {
            *pages -= 1;
            return Ok(SearchPage {
                total_results,
                messages: vec![],
            });
        }

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let messages = live
            .into_iter()
            .skip(offset)
            .take(PAGE_SIZE)
            .map(|m| vec![m])
            .collect();
        Ok(SearchPage {
            total_results,
            messages,
        })
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    fn set_credential(&self, credential: String) {
        *self.credential.lock() = Some(credential);
    }

    fn has_credential(&self) -> bool {
        self.credential
            .lock()
            .as_deref()
            .is_some_and(|c| !c.is_empty())
    }

    async fn current_user(&self) -> ApiResult<User> {
        match &self.state.lock().identity_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.user()),
        }
    }

    async fn list_communities(&self) -> ApiResult<Vec<Community>> {
        Ok(self.state.lock().communities.clone())
    }

    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        Ok(self.state.lock().conversations.clone())
    }

    async fn search_community(
        &self,
        community_id: &str,
        query: &SearchQuery,
    ) -> ApiResult<SearchPage> {
        self.search(community_id, query)
    }

    async fn search_conversation(
        &self,
        conversation_id: &str,
        query: &SearchQuery,
    ) -> ApiResult<SearchPage> {
        self.search(conversation_id, query)
    }

    async fn channel_history(
        &self,
        channel_id: &str,
        _cursor: &HistoryCursor,
        limit: u8,
    ) -> ApiResult<Vec<Message>> {
        let state = self.state.lock();
        Ok(state
            .messages
            .values()
            .flatten()
            .filter(|m| m.channel_id == channel_id)
            .take(usize::from(limit))
            .cloned()
            .collect())
    }

    async fn delete_message(
        &self,
        _channel_id: &str,
        message_id: &str,
    ) -> ApiResult<DeleteOutcome> {
        tokio::time::sleep(self.delete_latency).await;

        let mut state = self.state.lock();
        let outcome = state
            .delete_scripts
            .get(message_id)
            .cloned()
            .unwrap_or(Ok(DeleteOutcome::Deleted));
        if matches!(outcome, Ok(DeleteOutcome::Deleted)) {
            for messages in state.messages.values_mut() {
                messages.retain(|m| m.id != message_id);
            }
            state.deleted.push(message_id.to_string());
        }
        outcome
    }
}

/// [`MemoryStore`] that keeps every checkpoint written to it and can be told
/// to reject writes.
pub(crate) struct RecordingStore {
    inner: MemoryStore,
    checkpoints: Mutex<Vec<Checkpoint>>,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            checkpoints: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every checkpoint saved so far, oldest first.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.lock().clone()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for RecordingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        if key == CHECKPOINT_KEY {
            self.checkpoints.lock().push(Checkpoint::restore(value));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.inner.delete(key).await
    }
}

/// Controller over `remote` with an in-memory store and a captured credential.
pub(crate) async fn controller_with(remote: FakeRemote) -> (JobController, Arc<FakeRemote>) {
    controller_with_store(remote, Arc::new(MemoryStore::new())).await
}

/// Like [`controller_with`], restoring whatever `store` already holds.
pub(crate) async fn controller_with_store(
    remote: FakeRemote,
    store: Arc<dyn KeyValueStore>,
) -> (JobController, Arc<FakeRemote>) {
    let remote = Arc::new(remote);
    remote.set_credential("test-token".into());

    let controller = JobController::new(
        remote.clone(),
        store,
        JobConfig::default(),
        StateBroadcaster::new(),
    );
    controller.restore().await.unwrap();
    (controller, remote)
}
