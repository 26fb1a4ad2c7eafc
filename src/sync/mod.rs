//! Diff-sync of server-sourced collections.
//!
//! One [`SyncController`] per resource fetches the authoritative remote
//! list and reconciles the local table against it: new keys are inserted,
//! changed rows rewritten, and local keys the server no longer lists are
//! deleted. A failed fetch leaves the table untouched.

mod sources;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::storage::{Collection, Record};

pub use sources::{EventSource, ExamSource, NoticeSource, ScheduleSource, SubjectSource};

/// Produces the full authoritative list for one resource.
#[async_trait]
pub trait RemoteSource<R>: Send + Sync {
    async fn fetch(&self, token: &str) -> Result<Vec<R>, ApiError>;
}

/// Keys touched by one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport<K> {
    pub inserted: Vec<K>,
    pub updated: Vec<K>,
    pub deleted: Vec<K>,
    pub unchanged: usize,
}

impl<K> Default for SyncReport<K> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            unchanged: 0,
        }
    }
}

impl<K> SyncReport<K> {
    pub fn writes(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

impl<K> fmt::Display for SyncReport<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} removed, {} unchanged",
            self.inserted.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged
        )
    }
}

#[derive(Debug)]
pub enum SyncOutcome<K> {
    /// Local table now mirrors the remote list.
    Applied(SyncReport<K>),
    /// The fetch failed; nothing was written.
    Skipped(ApiError),
    /// The session ended while fetching; the response was dropped.
    Abandoned,
    /// Writing to the store failed part way. Rows written so far stay; the
    /// next pass converges.
    Failed(anyhow::Error),
}

impl<K> SyncOutcome<K> {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied(_))
    }
}

/// Make `collection` mirror `remote`.
///
/// Keys are compared against one bulk read of the local key set. When the
/// remote list repeats a key, the first occurrence wins.
pub fn reconcile<R: Record>(collection: &Collection<R>, remote: Vec<R>) -> Result<SyncReport<R::Key>> {
    let mut local: HashSet<R::Key> = collection.keys()?.into_iter().collect();
    let mut seen = HashSet::with_capacity(remote.len());
    let mut report = SyncReport::default();

    for item in remote {
        let key = item.key();
        if !seen.insert(key.clone()) {
            debug!(table = R::TABLE, ?key, "duplicate key in remote list, ignored");
            continue;
        }

        if !local.remove(&key) {
            collection.upsert(&item)?;
            report.inserted.push(key);
            continue;
        }

        let changed = match collection.get(&key)? {
            Some(stored) => item.has_changed(&stored),
            None => true,
        };
        if changed {
            collection.upsert(&item)?;
            report.updated.push(key);
        } else {
            report.unchanged += 1;
        }
    }

    for key in local {
        collection.delete(&key)?;
        report.deleted.push(key);
    }

    Ok(report)
}

/// Pulls one resource and applies it to its local table. At most one pass
/// per controller runs at a time; callers queue behind the running one.
pub struct SyncController<R: Record> {
    name: &'static str,
    source: Arc<dyn RemoteSource<R>>,
    collection: Collection<R>,
    running: Mutex<()>,
    /// Held while writing to `collection`, never across a fetch
    applying: Mutex<()>,
}

impl<R: Record> SyncController<R> {
    pub fn new(name: &'static str, source: Arc<dyn RemoteSource<R>>, collection: Collection<R>) -> Self {
        Self {
            name,
            source,
            collection,
            running: Mutex::new(()),
            applying: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn collection(&self) -> &Collection<R> {
        &self.collection
    }

    /// Delete every row once no pass is writing.
    pub async fn clear(&self) -> Result<usize> {
        let _applying = self.applying.lock().await;
        self.collection.delete_all()
    }

    /// Fetch with `token` and reconcile. `still_current` is checked after
    /// the fetch, under the same lock [`clear`](Self::clear) takes, so a
    /// pass that outlives its session writes nothing.
    pub async fn sync<F>(&self, token: &str, still_current: F) -> SyncOutcome<R::Key>
    where
        F: Fn() -> bool + Send + Sync,
    {
        let _running = self.running.lock().await;

        let remote = match self.source.fetch(token).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(resource = self.name, error = %err, "fetch failed, keeping local data");
                return SyncOutcome::Skipped(err);
            }
        };

        let _applying = self.applying.lock().await;
        if !still_current() {
            debug!(resource = self.name, "session ended during fetch, dropping response");
            return SyncOutcome::Abandoned;
        }

        let collection = self.collection.clone();
        let applied = tokio::task::spawn_blocking(move || reconcile(&collection, remote))
            .await
            .context("reconcile task panicked")
            .and_then(|r| r);

        match applied {
            Ok(report) => {
                if report.writes() > 0 {
                    info!(resource = self.name, "{report}");
                } else {
                    debug!(resource = self.name, "{report}");
                }
                SyncOutcome::Applied(report)
            }
            Err(err) => {
                warn!(resource = self.name, error = %err, "failed to apply remote data");
                SyncOutcome::Failed(err)
            }
        }
    }
}
