use std::collections::HashSet;

use anyhow::Result;
use redb::{ReadTransaction, WriteTransaction};

use super::{insert_children, read_children, Record};
use crate::model::{
    Evaluation, Event, EventKey, Exam, Grade, Notice, NoticeFile, ScheduleEntry, ScheduleKey,
    Subject,
};

pub(crate) const NOTICES: &str = "notices";
pub(crate) const NOTICE_FILES: &str = "notice_files";
pub(crate) const SCHEDULE: &str = "schedule";
pub(crate) const EXAMS: &str = "exams";
pub(crate) const EVENTS: &str = "events";
pub(crate) const SUBJECTS: &str = "subjects";
pub(crate) const EVALUATIONS: &str = "evaluations";
pub(crate) const GRADES: &str = "grades";

pub(crate) const TABLES: &[&str] = &[
    NOTICES,
    NOTICE_FILES,
    SCHEDULE,
    EXAMS,
    EVENTS,
    SUBJECTS,
    EVALUATIONS,
    GRADES,
];

impl Record for Notice {
    type Key = u64;
    const TABLE: &'static str = NOTICES;
    const CHILD_TABLES: &'static [&'static str] = &[NOTICE_FILES];

    fn key(&self) -> u64 {
        self.id
    }

    /// The server bumps the modification stamp on every edit.
    fn has_changed(&self, stored: &Self) -> bool {
        self.modified_at != stored.modified_at
    }

    fn write_children(&self, txn: &WriteTransaction, parent: &str) -> Result<()> {
        // URL identifies an attachment within its notice
        let mut seen = HashSet::new();
        let files: Vec<NoticeFile> = self
            .attachments
            .iter()
            .filter(|f| seen.insert(f.url.as_str()))
            .map(|f| NoticeFile {
                notice_id: self.id,
                ..f.clone()
            })
            .collect();
        insert_children(txn, NOTICE_FILES, parent, &files)
    }

    fn load_children(&mut self, txn: &ReadTransaction, parent: &str) -> Result<()> {
        self.attachments = read_children(txn, NOTICE_FILES, parent)?;
        Ok(())
    }
}

impl Record for ScheduleEntry {
    type Key = ScheduleKey;
    const TABLE: &'static str = SCHEDULE;

    fn key(&self) -> ScheduleKey {
        ScheduleEntry::key(self)
    }

    fn has_changed(&self, stored: &Self) -> bool {
        self != stored
    }
}

impl Record for Exam {
    type Key = u64;
    const TABLE: &'static str = EXAMS;

    fn key(&self) -> u64 {
        self.id
    }

    /// Rescheduling is the only change worth rewriting for.
    fn has_changed(&self, stored: &Self) -> bool {
        self.start != stored.start
    }
}

impl Record for Event {
    type Key = EventKey;
    const TABLE: &'static str = EVENTS;

    fn key(&self) -> EventKey {
        Event::key(self)
    }

    fn has_changed(&self, stored: &Self) -> bool {
        self != stored
    }
}

impl Record for Subject {
    type Key = String;
    const TABLE: &'static str = SUBJECTS;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn has_changed(&self, stored: &Self) -> bool {
        self != stored
    }
}

impl Record for Evaluation {
    type Key = u64;
    const TABLE: &'static str = EVALUATIONS;
    const CHILD_TABLES: &'static [&'static str] = &[GRADES];

    fn key(&self) -> u64 {
        self.id
    }

    fn has_changed(&self, stored: &Self) -> bool {
        self != stored
    }

    fn write_children(&self, txn: &WriteTransaction, parent: &str) -> Result<()> {
        let grades: Vec<Grade> = self
            .grades
            .iter()
            .map(|g| Grade {
                evaluation_id: self.id,
                ..g.clone()
            })
            .collect();
        insert_children(txn, GRADES, parent, &grades)
    }

    fn load_children(&mut self, txn: &ReadTransaction, parent: &str) -> Result<()> {
        self.grades = read_children(txn, GRADES, parent)?;
        Ok(())
    }
}
