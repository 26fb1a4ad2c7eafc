use serde::Deserialize;

use super::{ApiError, PortalApi};
use crate::model::Subject;

const SUBJECTS_PATH: &str = "me/subjects/";

#[derive(Deserialize)]
struct SubjectWire {
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    guide_url: String,
    #[serde(default)]
    group: String,
    acronym: String,
    #[serde(default)]
    numeric_code: String,
    #[serde(default)]
    semester: Option<String>,
    #[serde(default)]
    credits: f64,
    #[serde(default = "active_by_default")]
    active: bool,
    name: String,
}

fn active_by_default() -> bool {
    true
}

impl From<SubjectWire> for Subject {
    fn from(wire: SubjectWire) -> Self {
        Subject {
            id: wire.id,
            url: wire.url,
            guide_url: wire.guide_url,
            group: wire.group,
            acronym: wire.acronym,
            numeric_code: wire.numeric_code,
            semester: wire.semester,
            credits: wire.credits,
            active: wire.active,
            name: wire.name,
        }
    }
}

impl PortalApi {
    /// Subjects the user is enrolled in.
    pub async fn subjects(&self, token: &str) -> Result<Vec<Subject>, ApiError> {
        let wire: Vec<SubjectWire> = self.get_list(&self.url(SUBJECTS_PATH), token).await?;
        Ok(wire.into_iter().map(Subject::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{api, envelope};
    use super::super::transport::testing::ScriptedTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_subjects() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(
            "me/subjects/",
            200,
            &envelope(&[
                r#"{"id":"ALG","acronym":"ALG","name":"Algebra","credits":6.0,"group":"11","semester":"2024Q1"}"#,
            ]),
        );

        let subjects = api(&transport).subjects("tok").await.unwrap();
        assert_eq!(subjects.len(), 1);
        assert!(subjects[0].active);
        assert_eq!(subjects[0].semester.as_deref(), Some("2024Q1"));
    }

    #[tokio::test]
    async fn test_fetch_subjects_server_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("me/subjects/", 500, "");

        let err = api(&transport).subjects("tok").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
