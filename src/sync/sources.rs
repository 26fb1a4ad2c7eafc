use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::RemoteSource;
use crate::api::{ApiError, PortalApi};
use crate::model::{Event, Exam, Notice, ScheduleEntry, Subject};
use crate::storage::Collection;

pub struct NoticeSource(pub Arc<PortalApi>);

#[async_trait]
impl RemoteSource<Notice> for NoticeSource {
    async fn fetch(&self, token: &str) -> Result<Vec<Notice>, ApiError> {
        self.0.notices(token).await
    }
}

pub struct ScheduleSource(pub Arc<PortalApi>);

#[async_trait]
impl RemoteSource<ScheduleEntry> for ScheduleSource {
    async fn fetch(&self, token: &str) -> Result<Vec<ScheduleEntry>, ApiError> {
        self.0.schedule(token).await
    }
}

pub struct SubjectSource(pub Arc<PortalApi>);

#[async_trait]
impl RemoteSource<Subject> for SubjectSource {
    async fn fetch(&self, token: &str) -> Result<Vec<Subject>, ApiError> {
        self.0.subjects(token).await
    }
}

/// Events of a single category; the rest of the calendar is dropped.
pub struct EventSource {
    api: Arc<PortalApi>,
    category: String,
}

impl EventSource {
    pub fn new(api: Arc<PortalApi>, category: impl Into<String>) -> Self {
        Self {
            api,
            category: category.into(),
        }
    }
}

#[async_trait]
impl RemoteSource<Event> for EventSource {
    async fn fetch(&self, token: &str) -> Result<Vec<Event>, ApiError> {
        let mut events = self.api.events(token).await?;
        events.retain(|e| e.category == self.category);
        Ok(events)
    }
}

/// Current-semester exams for the subjects already stored locally.
pub struct ExamSource {
    api: Arc<PortalApi>,
    subjects: Collection<Subject>,
}

impl ExamSource {
    pub fn new(api: Arc<PortalApi>, subjects: Collection<Subject>) -> Self {
        Self { api, subjects }
    }
}

#[async_trait]
impl RemoteSource<Exam> for ExamSource {
    async fn fetch(&self, token: &str) -> Result<Vec<Exam>, ApiError> {
        let subjects = self.subjects.keys().map_err(|err| {
            warn!(error = %err, "failed to read local subjects");
            ApiError::Request(format!("subject filter unavailable: {err}"))
        })?;

        // No enrolment, no exams. Skip the round trips.
        if subjects.is_empty() {
            debug!("no local subjects, exam list is empty");
            return Ok(Vec::new());
        }

        self.api.exams(token, &subjects).await
    }
}
