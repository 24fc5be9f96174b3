//! Shared Match State Store
//!
//! The replicated key/value store all participants of a room read and
//! write. Semantics are last-write-wins per full snapshot: no
//! transactions, no compare-and-swap. Game rules stay correct by being
//! pure functions of whatever snapshot they see.
//!
//! [`MemoryStore`] is an in-process implementation. Snapshots are held as
//! JSON envelopes so every read decodes exactly what a remote participant
//! would.

use std::collections::BTreeMap;
use std::future::Future;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::core::hash::StateHash;
use crate::game::state::MatchState;
use crate::network::protocol::{RoomKey, SnapshotEnvelope};

/// Snapshots buffered per subscriber before it starts lagging.
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No snapshot under this key.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomKey),

    /// Snapshot failed to encode or decode.
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Replicated match-state store.
pub trait SharedStore: Send + Sync + 'static {
    /// Current snapshot.
    fn read(&self, key: &RoomKey) -> impl Future<Output = Result<MatchState, StoreError>> + Send;

    /// Replace the snapshot (creating the key if absent).
    fn write(&self, key: &RoomKey, state: MatchState) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply `f` to the latest snapshot and write the result back.
    fn update<F, R>(&self, key: &RoomKey, f: F) -> impl Future<Output = Result<R, StoreError>> + Send
    where
        F: FnOnce(&mut MatchState) -> R + Send,
        R: Send;

    /// Receive every snapshot published after this call.
    fn subscribe(
        &self,
        key: &RoomKey,
    ) -> impl Future<Output = Result<broadcast::Receiver<MatchState>, StoreError>> + Send;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

struct Entry {
    json: String,
    revision: u64,
    hash: StateHash,
    tx: broadcast::Sender<MatchState>,
}

impl Entry {
    fn decode(&self) -> Result<MatchState, StoreError> {
        Ok(SnapshotEnvelope::from_json(&self.json)?.state)
    }

    /// Publish `state` unless it hashes the same as what is stored.
    fn publish(&mut self, key: &RoomKey, state: MatchState) -> Result<bool, StoreError> {
        let hash = state.compute_hash();
        if hash == self.hash {
            trace!(key = %key, "Redundant write suppressed");
            return Ok(false);
        }

        let envelope = SnapshotEnvelope::new(self.revision + 1, state);
        self.json = envelope.to_json()?;
        self.revision = envelope.revision;
        self.hash = hash;

        // No subscribers is fine
        let _ = self.tx.send(envelope.state);
        Ok(true)
    }
}

/// In-process last-write-wins store.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<RoomKey, Entry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Revision of the snapshot under `key`.
    pub async fn revision(&self, key: &RoomKey) -> Option<u64> {
        self.entries.read().await.get(key).map(|e| e.revision)
    }

    /// Number of rooms held.
    pub async fn room_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl SharedStore for MemoryStore {
    async fn read(&self, key: &RoomKey) -> Result<MatchState, StoreError> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .ok_or_else(|| StoreError::RoomNotFound(key.clone()))?
            .decode()
    }

    async fn write(&self, key: &RoomKey, state: MatchState) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(key) {
            entry.publish(key, state)?;
            return Ok(());
        }

        let envelope = SnapshotEnvelope::new(1, state);
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        entries.insert(
            key.clone(),
            Entry {
                json: envelope.to_json()?,
                revision: envelope.revision,
                hash: envelope.state.compute_hash(),
                tx,
            },
        );
        debug!(key = %key, "Room created");
        Ok(())
    }

    async fn update<F, R>(&self, key: &RoomKey, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut MatchState) -> R + Send,
        R: Send,
    {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::RoomNotFound(key.clone()))?;

        let mut state = entry.decode()?;
        let result = f(&mut state);
        entry.publish(key, state)?;
        Ok(result)
    }

    async fn subscribe(&self, key: &RoomKey) -> Result<broadcast::Receiver<MatchState>, StoreError> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|e| e.tx.subscribe())
            .ok_or_else(|| StoreError::RoomNotFound(key.clone()))
    }
}

/// Store wrapper that answers slowly, for exercising timers and in-flight
/// client state.
#[cfg(test)]
pub(crate) struct DelayedStore {
    pub(crate) inner: MemoryStore,
    pub(crate) read_delay: std::time::Duration,
    pub(crate) update_delay: std::time::Duration,
}

#[cfg(test)]
impl DelayedStore {
    pub(crate) fn new(read_delay: std::time::Duration, update_delay: std::time::Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            read_delay,
            update_delay,
        }
    }
}

#[cfg(test)]
impl SharedStore for DelayedStore {
    async fn read(&self, key: &RoomKey) -> Result<MatchState, StoreError> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.read(key).await
    }

    async fn write(&self, key: &RoomKey, state: MatchState) -> Result<(), StoreError> {
        self.inner.write(key, state).await
    }

    async fn update<F, R>(&self, key: &RoomKey, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut MatchState) -> R + Send,
        R: Send,
    {
        tokio::time::sleep(self.update_delay).await;
        self.inner.update(key, f).await
    }

    async fn subscribe(&self, key: &RoomKey) -> Result<broadcast::Receiver<MatchState>, StoreError> {
        self.inner.subscribe(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Address, Player, Role, RoomId};
    use crate::network::protocol::room_key;

    fn seeded() -> (MemoryStore, RoomKey, MatchState) {
        let room = RoomId::new("store-room");
        (MemoryStore::new(), room_key(&room), MatchState::new(room))
    }

    #[tokio::test]
    async fn test_read_missing_room() {
        let (store, key, _) = seeded();
        assert!(matches!(store.read(&key).await, Err(StoreError::RoomNotFound(_))));
        assert!(matches!(store.subscribe(&key).await, Err(StoreError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, key, state) = seeded();
        store.write(&key, state.clone()).await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), state);
        assert_eq!(store.revision(&key).await, Some(1));
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_broadcasts_changes() {
        let (store, key, state) = seeded();
        store.write(&key, state).await.unwrap();
        let mut rx = store.subscribe(&key).await.unwrap();

        let a = Address::parse("0xa1").unwrap();
        let seated = store
            .update(&key, |s| {
                s.players.insert(a.clone(), Player::new(a.clone(), Role::Player1));
                s.players.len()
            })
            .await
            .unwrap();

        assert_eq!(seated, 1);
        let published = rx.recv().await.unwrap();
        assert_eq!(published.role_of(&a), Some(Role::Player1));
        assert_eq!(store.revision(&key).await, Some(2));
    }

    #[tokio::test]
    async fn test_redundant_write_suppressed() {
        let (store, key, state) = seeded();
        store.write(&key, state.clone()).await.unwrap();
        let mut rx = store.subscribe(&key).await.unwrap();

        store.write(&key, state.clone()).await.unwrap();
        store.update(&key, |s| s.player1_pulling = false).await.unwrap();

        assert_eq!(store.revision(&key).await, Some(1));
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (store, key, state) = seeded();
        store.write(&key, state.clone()).await.unwrap();

        let mut stale = state.clone();
        store.update(&key, |s| s.is_started = true).await.unwrap();

        // A writer holding an older snapshot overwrites the newer one
        stale.player2_pulling = true;
        store.write(&key, stale.clone()).await.unwrap();

        assert_eq!(store.read(&key).await.unwrap(), stale);
    }
}
