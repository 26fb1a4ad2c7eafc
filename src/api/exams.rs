use chrono::NaiveDateTime;
use serde::Deserialize;

use super::{ApiError, PortalApi};
use crate::model::Exam;

const CURRENT_SEMESTER_PATH: &str = "semesters/current/";

#[derive(Deserialize)]
struct SemesterWire {
    id: String,
}

#[derive(Deserialize)]
struct ExamWire {
    id: u64,
    subject_code: String,
    #[serde(default)]
    subject_numeric_code: String,
    #[serde(default)]
    rooms: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
    #[serde(default)]
    semester_index: u32,
    #[serde(default)]
    year: u32,
    #[serde(default)]
    plan: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    comments: String,
    #[serde(default)]
    lab: bool,
}

impl From<ExamWire> for Exam {
    fn from(wire: ExamWire) -> Self {
        Exam {
            id: wire.id,
            subject_code: wire.subject_code,
            subject_numeric_code: wire.subject_numeric_code,
            rooms: wire.rooms,
            start: wire.start,
            end: wire.end,
            semester_index: wire.semester_index,
            year: wire.year,
            curriculum_plan: wire.plan,
            kind: wire.kind,
            comments: wire.comments,
            is_lab: wire.lab,
        }
    }
}

impl PortalApi {
    /// Identifier of the semester in progress.
    pub async fn current_semester(&self, token: &str) -> Result<String, ApiError> {
        let semester: SemesterWire = self
            .get_json(&self.url(CURRENT_SEMESTER_PATH), token)
            .await?;
        Ok(semester.id)
    }

    /// Exams of the current semester, narrowed to `subjects` when non-empty.
    pub async fn exams(&self, token: &str, subjects: &[String]) -> Result<Vec<Exam>, ApiError> {
        let semester = self.current_semester(token).await?;
        let mut url = self.url(&format!(
            "semesters/{}/exams/",
            urlencoding::encode(&semester)
        ));
        if !subjects.is_empty() {
            let filter: Vec<String> = subjects
                .iter()
                .map(|s| urlencoding::encode(s).into_owned())
                .collect();
            url.push_str("?subjects=");
            url.push_str(&filter.join(","));
        }
        let wire: Vec<ExamWire> = self.get_list(&url, token).await?;
        Ok(wire.into_iter().map(Exam::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{api, envelope};
    use super::super::transport::testing::ScriptedTransport;
    use super::*;
    use std::sync::Arc;

    const EXAM: &str = r#"{"id":900,"subject_code":"ALG","rooms":"A5 A6","start":"2024-06-10T09:00:00","end":"2024-06-10T12:00:00","semester_index":2,"year":2024,"plan":"GRAU","kind":"F","lab":false}"#;

    #[tokio::test]
    async fn test_fetch_exams_with_filter() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("semesters/current/", 200, r#"{"id":"2023Q2"}"#)
            .reply("semesters/2023Q2/exams/", 200, &envelope(&[EXAM]));

        let exams = api(&transport)
            .exams("tok", &["ALG".to_string(), "M&M".to_string()])
            .await
            .unwrap();

        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].curriculum_plan, "GRAU");

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].url,
            "https://api.test/v2/semesters/2023Q2/exams/?subjects=ALG,M%26M"
        );
    }

    #[tokio::test]
    async fn test_fetch_exams_without_filter() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("semesters/current/", 200, r#"{"id":"2023Q2"}"#)
            .reply("semesters/2023Q2/exams/", 200, &envelope(&[]));

        api(&transport).exams("tok", &[]).await.unwrap();
        assert!(transport.sent()[1].url.ends_with("/exams/"));
    }

    #[tokio::test]
    async fn test_semester_lookup_failure_stops_fetch() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("semesters/current/", 404, "");

        let err = api(&transport).exams("tok", &[]).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(transport.sent().len(), 1);
    }
}
