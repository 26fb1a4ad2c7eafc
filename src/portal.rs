//! Wires the token manager, the store and the per-resource sync controllers
//! into one handle the CLI and the background runner share.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use futures_util::future::join4;
use tracing::{info, warn};

use crate::api::{PortalApi, TokenApi, TokenEndpoint, Transport};
use crate::auth::{RefreshPolicy, TokenError, TokenManager};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::grades::GradeBook;
use crate::model::{AccessToken, Event, Exam, Notice, ScheduleEntry, Subject};
use crate::storage::{Collection, Record, Store};
use crate::sync::{
    EventSource, ExamSource, NoticeSource, ScheduleSource, SubjectSource, SyncController,
    SyncOutcome,
};
use crate::trigger::TriggerOutcome;

/// A server-sourced collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Notices,
    Schedule,
    Exams,
    Events,
    Subjects,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Subjects,
        Resource::Notices,
        Resource::Schedule,
        Resource::Events,
        Resource::Exams,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Notices => "notices",
            Resource::Schedule => "schedule",
            Resource::Exams => "exams",
            Resource::Events => "events",
            Resource::Subjects => "subjects",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "notices" | "notice" => Ok(Resource::Notices),
            "schedule" => Ok(Resource::Schedule),
            "exams" | "exam" => Ok(Resource::Exams),
            "events" | "event" => Ok(Resource::Events),
            "subjects" | "subject" => Ok(Resource::Subjects),
            other => bail!(
                "unknown resource '{other}' (expected notices, schedule, exams, events or subjects)"
            ),
        }
    }
}

/// Result of syncing one resource.
#[derive(Debug)]
pub struct SyncSummary {
    pub resource: Resource,
    pub outcome: TriggerOutcome,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Notices that were not stored before this pass
    pub new_notices: Vec<Notice>,
    pub error: Option<String>,
}

impl SyncSummary {
    fn empty(resource: Resource, outcome: TriggerOutcome, error: Option<String>) -> Self {
        Self {
            resource,
            outcome,
            inserted: 0,
            updated: 0,
            deleted: 0,
            new_notices: Vec::new(),
            error,
        }
    }

    fn from_outcome<K>(resource: Resource, outcome: SyncOutcome<K>) -> Self {
        match outcome {
            SyncOutcome::Applied(report) => Self {
                inserted: report.inserted.len(),
                updated: report.updated.len(),
                deleted: report.deleted.len(),
                ..Self::empty(resource, TriggerOutcome::Success, None)
            },
            SyncOutcome::Skipped(err) => {
                Self::empty(resource, TriggerOutcome::Retry, Some(err.to_string()))
            }
            SyncOutcome::Failed(err) => {
                Self::empty(resource, TriggerOutcome::Failure, Some(format!("{err:#}")))
            }
            SyncOutcome::Abandoned => Self::empty(
                resource,
                TriggerOutcome::Failure,
                Some("session ended during sync".to_string()),
            ),
        }
    }

    fn token_unavailable(resource: Resource, err: &TokenError) -> Self {
        let outcome = match err {
            TokenError::Transient(_) => TriggerOutcome::Retry,
            TokenError::Invalid(_) | TokenError::NotLoggedIn => TriggerOutcome::Failure,
        };
        Self::empty(resource, outcome, Some(err.to_string()))
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{}: {:?} ({err})", self.resource, self.outcome),
            None => write!(
                f,
                "{}: {} new, {} updated, {} removed",
                self.resource, self.inserted, self.updated, self.deleted
            ),
        }
    }
}

pub struct Portal {
    store: Store,
    tokens: TokenManager,
    grades: GradeBook,
    notices: SyncController<Notice>,
    schedule: SyncController<ScheduleEntry>,
    exams: SyncController<Exam>,
    events: SyncController<Event>,
    subjects: SyncController<Subject>,
}

impl Portal {
    pub fn new(
        config: &Config,
        store: Store,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let token_api: Arc<dyn TokenEndpoint> = Arc::new(TokenApi::new(transport.clone(), &config.api));
        let tokens = TokenManager::new(token_api, credentials, RefreshPolicy::from(&config.token));
        let api = Arc::new(PortalApi::new(transport, &config.api));
        Self::assemble(config, store, tokens, api)
    }

    /// Build around an existing token manager.
    pub fn assemble(config: &Config, store: Store, tokens: TokenManager, api: Arc<PortalApi>) -> Self {
        let subjects = store.collection::<Subject>();
        Self {
            notices: SyncController::new(
                "notices",
                Arc::new(NoticeSource(api.clone())),
                store.collection(),
            ),
            schedule: SyncController::new(
                "schedule",
                Arc::new(ScheduleSource(api.clone())),
                store.collection(),
            ),
            exams: SyncController::new(
                "exams",
                Arc::new(ExamSource::new(api.clone(), subjects.clone())),
                store.collection(),
            ),
            events: SyncController::new(
                "events",
                Arc::new(EventSource::new(api.clone(), config.sync.event_category.clone())),
                store.collection(),
            ),
            subjects: SyncController::new("subjects", Arc::new(SubjectSource(api)), subjects),
            grades: GradeBook::new(store.clone()),
            store,
            tokens,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn grades(&self) -> &GradeBook {
        &self.grades
    }

    pub fn collection<R: Record>(&self) -> Collection<R> {
        self.store.collection()
    }

    pub async fn login(&self, code: &str) -> Result<AccessToken, TokenError> {
        self.tokens.login(code).await
    }

    /// Refresh the token now and report it the way a background job would.
    pub async fn refresh_token(&self) -> TriggerOutcome {
        match self.tokens.refresh().await {
            Ok(_) => TriggerOutcome::Success,
            Err(TokenError::Transient(_)) => TriggerOutcome::Retry,
            Err(TokenError::Invalid(_)) | Err(TokenError::NotLoggedIn) => TriggerOutcome::Failure,
        }
    }

    /// End the session and drop everything the server sent. Grades stay.
    ///
    /// Passes still fetching when this runs drop their responses.
    pub async fn logout(&self) -> Result<()> {
        self.tokens.logout();
        let removed = self.notices.clear().await?
            + self.schedule.clear().await?
            + self.exams.clear().await?
            + self.events.clear().await?
            + self.subjects.clear().await?;
        info!(removed, "cleared server data");
        Ok(())
    }

    pub async fn sync(&self, resource: Resource) -> SyncSummary {
        let session = self.tokens.session();
        let token = match self.tokens.valid_access_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(%resource, error = %err, "no usable access token");
                return SyncSummary::token_unavailable(resource, &err);
            }
        };
        let current = || self.tokens.session() == session;

        match resource {
            Resource::Notices => {
                let outcome = self.notices.sync(&token, current).await;
                let new_keys = match &outcome {
                    SyncOutcome::Applied(report) => report.inserted.clone(),
                    _ => Vec::new(),
                };
                let mut summary = SyncSummary::from_outcome(resource, outcome);
                for key in new_keys {
                    match self.notices.collection().get(&key) {
                        Ok(Some(notice)) => summary.new_notices.push(notice),
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "failed to read new notice"),
                    }
                }
                summary
            }
            Resource::Schedule => {
                SyncSummary::from_outcome(resource, self.schedule.sync(&token, current).await)
            }
            Resource::Exams => SyncSummary::from_outcome(resource, self.exams.sync(&token, current).await),
            Resource::Events => SyncSummary::from_outcome(resource, self.events.sync(&token, current).await),
            Resource::Subjects => {
                SyncSummary::from_outcome(resource, self.subjects.sync(&token, current).await)
            }
        }
    }

    /// Subjects first (exams are filtered by them), the rest concurrently.
    pub async fn sync_all(&self) -> Vec<SyncSummary> {
        let subjects = self.sync(Resource::Subjects).await;
        let (notices, schedule, events, exams) = join4(
            self.sync(Resource::Notices),
            self.sync(Resource::Schedule),
            self.sync(Resource::Events),
            self.sync(Resource::Exams),
        )
        .await;
        vec![subjects, notices, schedule, events, exams]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures::envelope;
    use crate::api::transport::testing::ScriptedTransport;
    use crate::credentials::MemoryCredentials;
    use crate::grades::GradeDraft;

    const TOKEN: &str = r#"{"access_token":"A1","token_type":"Bearer","expires_in":36000,"refresh_token":"R1","scope":""}"#;
    const SUBJECT: &str = r#"{"id":"ALG","acronym":"ALG","name":"Algebra"}"#;
    const NOTICE: &str = r#"{"id":5,"title":"Welcome","subject_code":"ALG","inserted_at":"2024-02-01T09:00:00","modified_at":"2024-02-01T09:00:00","attachments":[{"name":"a.pdf","url":"https://files.test/a.pdf","modified_at":"2024-02-01T09:00:00"}]}"#;
    const SLOT: &str = r#"{"subject_code":"ALG","weekday":2,"start_time":"10:00","duration":2}"#;
    const HOLIDAY: &str = r#"{"name":"Easter","start":"2024-03-25T00:00:00","end":"2024-04-01T00:00:00","category":"HOLIDAY"}"#;
    const EXAM: &str = r#"{"id":1,"subject_code":"ALG","start":"2024-06-10T09:00:00","end":"2024-06-10T12:00:00"}"#;

    fn test_config() -> Config {
        Config {
            api: crate::config::ApiConfig {
                base_url: "https://api.test/v2".to_string(),
                token_url: "https://api.test/o/token".to_string(),
                ..Default::default()
            },
            ..Config::default()
        }
    }

    fn portal(transport: &Arc<ScriptedTransport>) -> Portal {
        Portal::new(
            &test_config(),
            Store::open_in_memory().unwrap(),
            transport.clone(),
            Arc::new(MemoryCredentials::default()),
        )
    }

    fn script_everything(transport: &ScriptedTransport) {
        transport
            .reply("me/subjects/", 200, &envelope(&[SUBJECT]))
            .reply("me/notices/", 200, &envelope(&[NOTICE]))
            .reply("me/schedule/", 200, &envelope(&[SLOT]))
            .reply("events/", 200, &envelope(&[HOLIDAY]))
            .reply("semesters/current/", 200, r#"{"id":"2024Q1"}"#)
            .reply("semesters/2024Q1/exams/", 200, &envelope(&[EXAM]));
    }

    #[test]
    fn test_resource_parsing() {
        assert_eq!("Exams".parse::<Resource>().unwrap(), Resource::Exams);
        assert_eq!("notice".parse::<Resource>().unwrap(), Resource::Notices);
        assert!("grades".parse::<Resource>().is_err());
        for resource in Resource::ALL {
            assert_eq!(resource.to_string().parse::<Resource>().unwrap(), resource);
        }
    }

    #[tokio::test]
    async fn test_sync_requires_login() {
        let transport = Arc::new(ScriptedTransport::new());
        let portal = portal(&transport);

        let summary = portal.sync(Resource::Notices).await;

        assert_eq!(summary.outcome, TriggerOutcome::Failure);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_after_login() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("o/token", 200, TOKEN);
        script_everything(&transport);
        let portal = portal(&transport);

        portal.login("code").await.unwrap();
        let summaries = portal.sync_all().await;

        assert_eq!(summaries.len(), 5);
        assert!(summaries.iter().all(|s| s.outcome == TriggerOutcome::Success), "{summaries:?}");
        assert_eq!(summaries[0].resource, Resource::Subjects);

        let notices = summaries.iter().find(|s| s.resource == Resource::Notices).unwrap();
        assert_eq!(notices.new_notices.len(), 1);
        assert_eq!(notices.new_notices[0].attachments.len(), 1);

        assert_eq!(portal.collection::<Exam>().len().unwrap(), 1);
        assert_eq!(portal.collection::<Event>().len().unwrap(), 1);
        assert!(transport
            .sent()
            .iter()
            .filter(|s| s.method == "GET")
            .all(|s| s.bearer.as_deref() == Some("A1")));
    }

    #[tokio::test]
    async fn test_sync_refreshes_expired_session_first() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("o/token", 200, TOKEN)
            .reply("me/notices/", 200, &envelope(&[]));
        let credentials = Arc::new(MemoryCredentials::default());
        credentials
            .save(&AccessToken {
                access_token: "EXPIRED".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: 3600,
                refresh_token: "R0".to_string(),
                scope: String::new(),
                issued_at: chrono::Utc::now() - chrono::Duration::days(2),
            })
            .unwrap();
        let portal = Portal::new(
            &test_config(),
            Store::open_in_memory().unwrap(),
            transport.clone(),
            credentials,
        );
        assert!(portal.tokens().restore().unwrap());

        let summary = portal.sync(Resource::Notices).await;

        assert_eq!(summary.outcome, TriggerOutcome::Success, "{summary}");
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, "POST");
        assert!(sent[0].body.as_deref().unwrap_or_default().contains("refresh_token=R0"));
        assert!(sent[1].url.ends_with("me/notices/"));
        assert_eq!(sent[1].bearer.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_sync_retries_later_when_refresh_unreachable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("o/token", "offline");
        let credentials = Arc::new(MemoryCredentials::default());
        credentials
            .save(&AccessToken {
                access_token: "EXPIRED".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: 3600,
                refresh_token: "R0".to_string(),
                scope: String::new(),
                issued_at: chrono::Utc::now() - chrono::Duration::days(2),
            })
            .unwrap();
        let portal = Portal::new(
            &test_config(),
            Store::open_in_memory().unwrap(),
            transport.clone(),
            credentials,
        );
        portal.tokens().restore().unwrap();

        let summary = portal.sync(Resource::Notices).await;

        assert_eq!(summary.outcome, TriggerOutcome::Retry);
        assert!(transport.sent().iter().all(|s| s.method == "POST"));
    }

    #[tokio::test]
    async fn test_failed_resource_does_not_block_others() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("o/token", 200, TOKEN)
            .reply("me/subjects/", 200, &envelope(&[SUBJECT]))
            .reply("me/notices/", 503, "")
            .reply("me/schedule/", 200, &envelope(&[SLOT]))
            .reply("events/", 200, &envelope(&[]))
            .reply("semesters/current/", 200, r#"{"id":"2024Q1"}"#)
            .reply("semesters/2024Q1/exams/", 200, &envelope(&[]));
        let portal = portal(&transport);
        portal.login("code").await.unwrap();

        let summaries = portal.sync_all().await;

        let notices = summaries.iter().find(|s| s.resource == Resource::Notices).unwrap();
        assert_eq!(notices.outcome, TriggerOutcome::Retry);
        let schedule = summaries.iter().find(|s| s.resource == Resource::Schedule).unwrap();
        assert_eq!(schedule.outcome, TriggerOutcome::Success);
        assert_eq!(portal.collection::<ScheduleEntry>().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_logout_keeps_grades() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("o/token", 200, TOKEN);
        script_everything(&transport);
        let portal = portal(&transport);
        portal.login("code").await.unwrap();
        portal.sync_all().await;

        let evaluation = portal.grades().create_evaluation("ALG", "Continuous").unwrap();
        portal
            .grades()
            .save_evaluation(&evaluation, vec![GradeDraft::parse("Final", "100", "6", "").unwrap()])
            .unwrap();

        portal.logout().await.unwrap();

        assert!(!portal.tokens().is_logged_in());
        assert!(portal.collection::<Notice>().is_empty().unwrap());
        assert!(portal.collection::<Subject>().is_empty().unwrap());
        assert!(portal.store().notice_files().unwrap().is_empty());
        assert_eq!(portal.grades().evaluations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_token_outcomes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("o/token", 200, TOKEN)
            .fail("o/token", "offline")
            .reply("o/token", 400, r#"{"error":"invalid_grant"}"#);
        let portal = portal(&transport);

        assert_eq!(portal.refresh_token().await, TriggerOutcome::Failure);
        portal.login("code").await.unwrap();
        assert_eq!(portal.refresh_token().await, TriggerOutcome::Retry);
        assert_eq!(portal.refresh_token().await, TriggerOutcome::Failure);
    }
}
