//! Domain entities shared by the API adapters, the local store and the
//! controllers.
//!
//! Server-sourced entities (notices, schedule, exams, events, subjects) are
//! cached projections of the remote service. Evaluations and grades are
//! authored locally and never leave the device.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_grades::Weighted;

/// OAuth2 bearer token pair as issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds, counted from `issued_at`
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
    /// Not sent by the server; stamped when the response is decoded.
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + chrono::Duration::seconds(self.expires_in.min(u32::MAX as u64) as i64)
    }

    /// Time until the token should be refreshed, `margin` ahead of expiry.
    pub fn refresh_delay(&self, margin: Duration) -> Duration {
        let lifetime = Duration::from_secs(self.expires_in).saturating_sub(margin);
        let elapsed = (Utc::now() - self.issued_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        lifetime.saturating_sub(elapsed)
    }
}

/// An announcement posted for one of the user's subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: u64,
    pub title: String,
    pub subject_code: String,
    pub text: String,
    pub inserted_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    /// Stored as separate rows owned by this notice.
    #[serde(skip)]
    pub attachments: Vec<NoticeFile>,
}

/// A file attached to a notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeFile {
    pub mime_type: String,
    pub name: String,
    pub url: String,
    pub modified_at: NaiveDateTime,
    pub size_bytes: u64,
    pub notice_id: u64,
}

/// A weekly recurring class slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub subject_code: String,
    /// ISO weekday, 1 = Monday .. 7 = Sunday
    pub weekday: u8,
    /// Local start time, "HH:MM"
    pub start_time: String,
    pub group: String,
    pub duration_hours: u32,
    pub kind: String,
    pub rooms: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleKey {
    pub subject_code: String,
    pub weekday: u8,
    pub start_time: String,
}

impl ScheduleEntry {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey {
            subject_code: self.subject_code.clone(),
            weekday: self.weekday,
            start_time: self.start_time.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: u64,
    pub subject_code: String,
    pub subject_numeric_code: String,
    pub rooms: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub semester_index: u32,
    pub year: u32,
    pub curriculum_plan: String,
    pub kind: String,
    pub comments: String,
    pub is_lab: bool,
}

/// A calendar event (holidays, exam periods, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub name: String,
    pub start: NaiveDateTime,
}

impl Event {
    pub fn key(&self) -> EventKey {
        EventKey {
            name: self.name.clone(),
            start: self.start,
        }
    }
}

/// A subject the user is enrolled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub url: String,
    pub guide_url: String,
    pub group: String,
    pub acronym: String,
    pub numeric_code: String,
    pub semester: Option<String>,
    pub credits: f64,
    pub active: bool,
    pub name: String,
}

/// A user-defined breakdown of how a subject is graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: u64,
    pub subject_id: String,
    pub name: String,
    /// Stored as separate rows owned by this evaluation.
    #[serde(skip)]
    pub grades: Vec<Grade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: u64,
    pub evaluation_id: u64,
    pub name: String,
    /// Percentage of the final mark, 0..=100
    pub weight: f64,
    /// None until graded
    pub mark: Option<f64>,
    pub description: String,
}

impl Grade {
    pub fn weighted(&self) -> Weighted {
        Weighted {
            weight: self.weight,
            mark: self.mark,
        }
    }
}

impl Evaluation {
    fn weighted(&self) -> Vec<Weighted> {
        self.grades.iter().map(Grade::weighted).collect()
    }

    /// Weighted sum of the marks entered so far.
    pub fn final_mark(&self) -> f64 {
        campus_grades::final_mark(&self.weighted())
    }

    /// Mark needed on the ungraded weight to pass; None once passing is
    /// out of reach.
    pub fn pass_mark(&self) -> Option<f64> {
        campus_grades::pass_mark(&self.weighted())
    }

    pub fn total_weight(&self) -> f64 {
        self.grades.iter().map(|g| g.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: u64, issued_at: DateTime<Utc>) -> AccessToken {
        AccessToken {
            access_token: "a".to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token: "r".to_string(),
            scope: String::new(),
            issued_at,
        }
    }

    #[test]
    fn test_refresh_delay_fresh_token() {
        let delay = token(3600, Utc::now()).refresh_delay(Duration::from_secs(100));
        assert!(delay <= Duration::from_secs(3500));
        assert!(delay > Duration::from_secs(3499));
    }

    #[test]
    fn test_refresh_delay_counts_elapsed_time() {
        let issued = Utc::now() - chrono::Duration::seconds(1000);
        let delay = token(3600, issued).refresh_delay(Duration::from_secs(100));
        assert!(delay <= Duration::from_secs(2500));
        assert!(delay > Duration::from_secs(2499));
    }

    #[test]
    fn test_refresh_delay_saturates() {
        let issued = Utc::now() - chrono::Duration::seconds(7200);
        assert_eq!(token(3600, issued).refresh_delay(Duration::from_secs(100)), Duration::ZERO);
        assert_eq!(token(50, Utc::now()).refresh_delay(Duration::from_secs(100)), Duration::ZERO);
    }

    #[test]
    fn test_token_decodes_without_issue_stamp() {
        let json = r#"{"access_token":"a","token_type":"Bearer","expires_in":3600,"refresh_token":"r","scope":"read"}"#;
        let before = Utc::now();
        let token: AccessToken = serde_json::from_str(json).unwrap();
        assert!(token.issued_at >= before);
        assert_eq!(token.expires_at() - token.issued_at, chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_evaluation_marks() {
        let grade = |weight, mark| Grade {
            id: 0,
            evaluation_id: 1,
            name: String::new(),
            weight,
            mark,
            description: String::new(),
        };
        let evaluation = Evaluation {
            id: 1,
            subject_id: "ALG".to_string(),
            name: "Continuous".to_string(),
            grades: vec![grade(40.0, Some(8.0)), grade(60.0, None)],
        };
        assert!((evaluation.final_mark() - 3.2).abs() < 1e-9);
        assert!((evaluation.pass_mark().unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(evaluation.total_weight(), 100.0);
    }
}
