//! Background work: periodic sync and token refresh as seen by a scheduler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::TokenEvent;
use crate::model::Notice;
use crate::portal::{Portal, SyncSummary};

/// What a background job reports back to whatever scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Success,
    /// Transient failure; run again later.
    Retry,
    /// Do not retry until something changes (login, config).
    Failure,
}

impl TriggerOutcome {
    /// Worst outcome of a batch: any failure beats any retry.
    pub fn combine(outcomes: impl IntoIterator<Item = TriggerOutcome>) -> TriggerOutcome {
        outcomes
            .into_iter()
            .fold(TriggerOutcome::Success, |acc, o| match (acc, o) {
                (TriggerOutcome::Failure, _) | (_, TriggerOutcome::Failure) => TriggerOutcome::Failure,
                (TriggerOutcome::Retry, _) | (_, TriggerOutcome::Retry) => TriggerOutcome::Retry,
                _ => TriggerOutcome::Success,
            })
    }
}

/// Receives notices that appeared during a background sync.
pub trait Notifier: Send + Sync {
    fn new_notice(&self, notice: &Notice);
}

/// Writes new notices to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn new_notice(&self, notice: &Notice) {
        info!(
            subject = %notice.subject_code,
            id = notice.id,
            files = notice.attachments.len(),
            "new notice: {}",
            notice.title
        );
    }
}

/// Why [`PeriodicSync::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    Shutdown,
    /// The server revoked the session and local data was cleared.
    LoggedOut,
}

/// Syncs everything on a fixed interval until shut down or logged out.
pub struct PeriodicSync {
    portal: Arc<Portal>,
    interval: Duration,
    notifier: Arc<dyn Notifier>,
}

impl PeriodicSync {
    pub fn new(portal: Arc<Portal>, interval: Duration) -> Self {
        Self {
            portal,
            interval,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run one sync pass and hand new notices to the notifier.
    pub async fn run_once(&self) -> TriggerOutcome {
        let summaries = self.portal.sync_all().await;
        self.report(&summaries);
        TriggerOutcome::combine(summaries.iter().map(|s| s.outcome))
    }

    fn report(&self, summaries: &[SyncSummary]) {
        for summary in summaries {
            match summary.error {
                Some(_) => warn!("{summary}"),
                None => debug!("{summary}"),
            }
            for notice in &summary.new_notices {
                self.notifier.new_notice(notice);
            }
        }
    }

    /// The first pass runs immediately.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<Stopped> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut token_events = self.portal.tokens().subscribe();
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "background sync started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("background sync stopped");
                    return Ok(Stopped::Shutdown);
                }
                event = token_events.recv() => match event {
                    Ok(TokenEvent::Invalidated) => {
                        warn!("session revoked by server, logging out");
                        self.portal.logout().await?;
                        return Ok(Stopped::LoggedOut);
                    }
                    Ok(TokenEvent::LoggedOut) => {
                        info!("logged out, stopping background sync");
                        return Ok(Stopped::LoggedOut);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Ok(Stopped::Shutdown),
                },
                _ = ticker.tick() => {
                    let outcome = self.run_once().await;
                    debug!(?outcome, "sync pass finished");
                }
            }
        }
    }
}
