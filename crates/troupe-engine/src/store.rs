//! Session persistence seam and the in-memory store.
//!
//! The engine reads and writes sessions through [`SessionStore`] so the loop
//! never touches a concrete container. [`InMemorySessionStore`] is the
//! single-process implementation the server ships with; anything durable can
//! slot in behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use troupe_core::{Message, MessageId, Session, SessionId, SessionPatch};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from session storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No session with the given id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session exists but holds no message with the given id.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Where sessions live while the engine runs them.
///
/// Round commits go through [`SessionStore::append_messages`] as one batch:
/// the transcript gains a whole round at a time, never a partial one, even
/// when two writers race.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session by id. `None` means the id is unknown, not an error.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Insert a session, replacing any existing one with the same id.
    async fn insert(&self, session: Session) -> Result<(), StoreError>;

    /// Apply a patch and return the updated session.
    async fn update(&self, id: &SessionId, patch: SessionPatch) -> Result<Session, StoreError>;

    /// Append a batch of messages to the transcript in a single step.
    ///
    /// The default is a read-modify-write over `get` and `insert`. Stores
    /// that can hold a lock across the mutation should override it so two
    /// racing batches cannot interleave or drop each other.
    async fn append_messages(
        &self,
        id: &SessionId,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        let mut session = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        session.messages.extend(messages);
        self.insert(session).await
    }

    /// Backfill the image interpretation on a user message, rewriting its
    /// model-facing content in the same step.
    async fn fill_interpretation(
        &self,
        id: &SessionId,
        message_id: &MessageId,
        interpretation: String,
        content: String,
    ) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local session store.
///
/// Sessions are gone when the process exits. A write lock held across each
/// mutation keeps round commits atomic.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let _ = self
            .sessions
            .write()
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn update(&self, id: &SessionId, patch: SessionPatch) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        patch.apply(session);
        Ok(session.clone())
    }

    async fn append_messages(
        &self,
        id: &SessionId,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        session.messages.extend(messages);
        Ok(())
    }

    async fn fill_interpretation(
        &self,
        id: &SessionId,
        message_id: &MessageId,
        interpretation: String,
        content: String,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let message = session
            .messages
            .iter_mut()
            .find(|m| m.id() == message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.clone()))?;
        let _ = message.fill_interpretation(interpretation, content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use troupe_core::Character;

    fn seeded(purpose: &str) -> Session {
        Session::new(purpose)
    }

    #[tokio::test]
    async fn get_unknown_session_is_none() {
        let store = InMemorySessionStore::new();
        let missing = SessionId::from("missing");
        assert!(store.get(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let session = seeded("三国辩论");
        let id = session.id.clone();

        store.insert(session).await.unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.purpose, "三国辩论");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn insert_replaces_session_with_same_id() {
        let store = InMemorySessionStore::new();
        let mut session = seeded("first");
        let id = session.id.clone();
        store.insert(session.clone()).await.unwrap();

        session.purpose = "second".into();
        store.insert(session).await.unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.purpose, "second");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_applies_patch_and_returns_copy() {
        let store = InMemorySessionStore::new();
        let session = seeded("p");
        let id = session.id.clone();
        store.insert(session).await.unwrap();

        let patch = SessionPatch {
            title: Some("官渡之战".into()),
            has_narrator: Some(true),
            ..SessionPatch::default()
        };
        let updated = store.update(&id, patch).await.unwrap();

        assert_eq!(updated.title.as_deref(), Some("官渡之战"));
        assert!(updated.has_narrator);
        let fetched = store.get(&id).await.unwrap().unwrap();
        assert!(fetched.has_narrator);
    }

    #[tokio::test]
    async fn update_unknown_session_errors() {
        let store = InMemorySessionStore::new();
        let missing = SessionId::from("missing");
        let err = store
            .update(&missing, SessionPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "session not found: missing");
    }

    #[tokio::test]
    async fn append_extends_transcript_in_order() {
        let store = InMemorySessionStore::new();
        let session = seeded("p");
        let id = session.id.clone();
        store.insert(session).await.unwrap();

        store
            .append_messages(&id, vec![Message::user("大家好")])
            .await
            .unwrap();
        let cao = Character::new("c1", "曹操", "枭雄");
        store
            .append_messages(&id, vec![Message::character(&cao, "天下英雄")])
            .await
            .unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.messages.len(), 2);
        assert!(fetched.messages[0].is_user());
        assert_eq!(fetched.messages[1].speaker_name(), Some("曹操"));
    }

    #[tokio::test]
    async fn concurrent_batches_never_interleave() {
        let store = Arc::new(InMemorySessionStore::new());
        let session = seeded("p");
        let id = session.id.clone();
        store.insert(session).await.unwrap();

        let a = Character::new("a", "甲", "x");
        let b = Character::new("b", "乙", "y");
        let batch_a: Vec<Message> = (0..3).map(|i| Message::character(&a, format!("a{i}"))).collect();
        let batch_b: Vec<Message> = (0..3).map(|i| Message::character(&b, format!("b{i}"))).collect();

        let store_a = Arc::clone(&store);
        let store_b = Arc::clone(&store);
        let id_a = id.clone();
        let id_b = id.clone();
        let ha = tokio::spawn(async move { store_a.append_messages(&id_a, batch_a).await });
        let hb = tokio::spawn(async move { store_b.append_messages(&id_b, batch_b).await });
        ha.await.unwrap().unwrap();
        hb.await.unwrap().unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        let speakers: Vec<&str> = fetched
            .messages
            .iter()
            .filter_map(troupe_core::Message::speaker_name)
            .collect();
        assert_eq!(speakers.len(), 6);
        // One batch lands wholly before the other, whichever wins the lock.
        assert!(
            speakers == ["甲", "甲", "甲", "乙", "乙", "乙"]
                || speakers == ["乙", "乙", "乙", "甲", "甲", "甲"],
            "batches interleaved: {speakers:?}"
        );
    }

    #[tokio::test]
    async fn fill_interpretation_rewrites_stored_message() {
        let store = InMemorySessionStore::new();
        let session = seeded("p");
        let id = session.id.clone();
        store.insert(session).await.unwrap();

        let message = Message::user_with_images("看这个", vec!["data:image/png;base64,AA==".into()]);
        let message_id = message.id().clone();
        store.append_messages(&id, vec![message]).await.unwrap();

        store
            .fill_interpretation(
                &id,
                &message_id,
                "一张地图".into(),
                "看这个\n[用户发送了1张图片]\n一张地图".into(),
            )
            .await
            .unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        let stored = &fetched.messages[0];
        assert!(stored.content().contains("一张地图"));
        assert_eq!(stored.display_text(), "看这个");
    }

    #[tokio::test]
    async fn fill_interpretation_unknown_message_errors() {
        let store = InMemorySessionStore::new();
        let session = seeded("p");
        let id = session.id.clone();
        store.insert(session).await.unwrap();

        let bogus = MessageId::from("nope");
        let err = store
            .fill_interpretation(&id, &bogus, "x".into(), "y".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "message not found: nope");
    }
}
