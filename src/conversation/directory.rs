use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::core::models::{AI_PARTICIPANT_ID, Participant};
use crate::errors::ChatError;
use crate::store::ConversationStore;

/// Participant id to profile, as consumed by the prompt builder.
pub type Directory = HashMap<String, Participant>;

/// Session-scoped participant cache. Profiles are fetched once and never
/// live-updated, so they may go stale for the life of the session.
pub struct ParticipantDirectory {
    store: Arc<dyn ConversationStore>,
    cache: RwLock<Directory>,
}

impl ParticipantDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        let mut cache = HashMap::new();
        cache.insert(AI_PARTICIPANT_ID.to_string(), Participant::ai());
        Self {
            store,
            cache: RwLock::new(cache),
        }
    }

    /// Resolves every id, fetching the ones not cached yet concurrently.
    ///
    /// Never fails as a whole: an id the store doesn't know, or whose lookup
    /// fails, resolves to the "Unknown" placeholder. Failed lookups are not
    /// cached and are retried on the next call.
    pub async fn resolve<'a, I>(&self, ids: I) -> Directory
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut wanted: Vec<&str> = ids.into_iter().collect();
        wanted.sort_unstable();
        wanted.dedup();

        let missing: Vec<&str> = {
            let cache = self.cache.read().await;
            wanted
                .iter()
                .copied()
                .filter(|id| !cache.contains_key(*id))
                .collect()
        };

        if !missing.is_empty() {
            debug!(count = missing.len(), "Fetching participant profiles");
            let fetches = missing
                .iter()
                .map(|id| async move { (*id, self.fetch(id).await) });

            let mut resolved = Vec::with_capacity(missing.len());
            for (id, result) in join_all(fetches).await {
                match result {
                    Ok(Some(participant)) => resolved.push(participant),
                    Ok(None) => {
                        debug!(participant_id = %id, "Participant not found; using placeholder");
                        resolved.push(Participant::unknown(id));
                    }
                    Err(e) => {
                        let failure = ChatError::DirectoryLookupFailed {
                            id: id.to_string(),
                            reason: e.to_string(),
                        };
                        warn!("{failure}");
                    }
                }
            }

            let mut cache = self.cache.write().await;
            for participant in resolved {
                cache.entry(participant.id.clone()).or_insert(participant);
            }
        }

        let cache = self.cache.read().await;
        wanted
            .into_iter()
            .map(|id| {
                let participant = cache
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| Participant::unknown(id));
                (id.to_string(), participant)
            })
            .collect()
    }

    /// Cached profile, if resolved earlier in this session.
    pub async fn cached(&self, id: &str) -> Option<Participant> {
        self.cache.read().await.get(id).cloned()
    }

    async fn fetch(&self, id: &str) -> Result<Option<Participant>, ChatError> {
        let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(2);
        Retry::spawn(strategy, || self.store.get_participant(id)).await
    }
}

/// Display name for `id`, falling back to the "Unknown" placeholder.
#[must_use]
pub fn display_name<'a>(directory: &'a Directory, id: &str) -> &'a str {
    directory
        .get(id)
        .map_or(crate::core::models::UNKNOWN_DISPLAY_NAME, |p| {
            p.display_name.as_str()
        })
}
