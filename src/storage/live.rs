use anyhow::Result;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::{Collection, Record};

/// Re-reads a collection every time its table is written.
///
/// The first call to [`next`](LiveQuery::next) yields the current contents
/// straight away. Later calls wait for a commit touching the table, then
/// drain any commits already queued so a burst of writes (a sync pass)
/// yields a single snapshot.
pub struct LiveQuery<R: Record> {
    collection: Collection<R>,
    changes: broadcast::Receiver<&'static str>,
    primed: bool,
}

impl<R: Record> LiveQuery<R> {
    pub(super) fn new(collection: Collection<R>, changes: broadcast::Receiver<&'static str>) -> Self {
        Self {
            collection,
            changes,
            primed: false,
        }
    }

    /// Next snapshot, or None once the store is gone.
    pub async fn next(&mut self) -> Option<Result<Vec<R>>> {
        if self.primed {
            loop {
                match self.changes.recv().await {
                    Ok(table) if table == R::TABLE => break,
                    Ok(_) => continue,
                    // Missed notifications; the table may have changed
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return None,
                }
            }
            self.drain();
        }
        self.primed = true;
        Some(self.collection.all())
    }

    fn drain(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}
