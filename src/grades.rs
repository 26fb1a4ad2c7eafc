//! Local grade book: evaluations and their weighted grades.
//!
//! Nothing here touches the network. Input is validated with
//! [`campus_grades`] before it reaches the store, and saving an evaluation
//! replaces its whole grade list in one transaction.

use anyhow::Result;
use campus_grades::{parse_mark, parse_weight, InvalidInput};
use tracing::debug;

use crate::model::{Evaluation, Grade};
use crate::storage::{Collection, LiveQuery, Store};

const EVALUATION_IDS: &str = "evaluation";
const GRADE_IDS: &str = "grade";

/// A grade as entered, before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeDraft {
    pub name: String,
    pub weight: f64,
    pub mark: Option<f64>,
    pub description: String,
}

impl GradeDraft {
    /// Validate raw form input. A blank mark means "not graded yet".
    pub fn parse(name: &str, weight: &str, mark: &str, description: &str) -> Result<Self, InvalidInput> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InvalidInput::Missing("name"));
        }
        Ok(Self {
            name: name.to_string(),
            weight: parse_weight(weight)?,
            mark: parse_mark(mark)?,
            description: description.trim().to_string(),
        })
    }

    /// Parse `name:weight[:mark[:description]]`.
    pub fn parse_spec(spec: &str) -> Result<Self, InvalidInput> {
        let mut parts = spec.splitn(4, ':');
        let name = parts.next().unwrap_or_default();
        let weight = parts.next().unwrap_or_default();
        let mark = parts.next().unwrap_or_default();
        let description = parts.next().unwrap_or_default();
        Self::parse(name, weight, mark, description)
    }
}

#[derive(Clone)]
pub struct GradeBook {
    store: Store,
    evaluations: Collection<Evaluation>,
}

impl GradeBook {
    pub fn new(store: Store) -> Self {
        let evaluations = store.collection();
        Self { store, evaluations }
    }

    pub fn create_evaluation(&self, subject_id: &str, name: &str) -> Result<Evaluation> {
        let evaluation = Evaluation {
            id: self.store.reserve_ids(EVALUATION_IDS, 1)?,
            subject_id: subject_id.to_string(),
            name: name.to_string(),
            grades: Vec::new(),
        };
        self.evaluations.upsert(&evaluation)?;
        debug!(id = evaluation.id, subject = subject_id, "evaluation created");
        Ok(evaluation)
    }

    /// Delete an evaluation and all of its grades.
    pub fn delete_evaluation(&self, id: u64) -> Result<bool> {
        self.evaluations.delete(&id)
    }

    pub fn rename_evaluation(&self, id: u64, name: &str) -> Result<Option<Evaluation>> {
        let Some(mut evaluation) = self.evaluations.get(&id)? else {
            return Ok(None);
        };
        evaluation.name = name.to_string();
        self.evaluations.upsert(&evaluation)?;
        Ok(Some(evaluation))
    }

    /// Replace the grades of `evaluation` with `drafts`, in order. Every
    /// grade gets a fresh id.
    pub fn save_evaluation(&self, evaluation: &Evaluation, drafts: Vec<GradeDraft>) -> Result<Evaluation> {
        let first_id = if drafts.is_empty() {
            0
        } else {
            self.store.reserve_ids(GRADE_IDS, drafts.len() as u64)?
        };

        let grades = drafts
            .into_iter()
            .zip(first_id..)
            .map(|(draft, id)| Grade {
                id,
                evaluation_id: evaluation.id,
                name: draft.name,
                weight: draft.weight,
                mark: draft.mark,
                description: draft.description,
            })
            .collect();

        let saved = Evaluation {
            grades,
            ..evaluation.clone()
        };
        self.evaluations.upsert(&saved)?;
        debug!(id = saved.id, grades = saved.grades.len(), "evaluation saved");
        Ok(saved)
    }

    pub fn evaluation(&self, id: u64) -> Result<Option<Evaluation>> {
        self.evaluations.get(&id)
    }

    pub fn evaluations(&self) -> Result<Vec<Evaluation>> {
        self.evaluations.all()
    }

    pub fn evaluations_for(&self, subject_id: &str) -> Result<Vec<Evaluation>> {
        let mut all = self.evaluations.all()?;
        all.retain(|e| e.subject_id == subject_id);
        Ok(all)
    }

    pub fn watch(&self) -> LiveQuery<Evaluation> {
        self.evaluations.watch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> GradeBook {
        GradeBook::new(Store::open_in_memory().unwrap())
    }

    fn draft(name: &str, weight: &str, mark: &str) -> GradeDraft {
        GradeDraft::parse(name, weight, mark, "").unwrap()
    }

    #[test]
    fn test_create_assigns_ids() {
        let book = book();
        let a = book.create_evaluation("ALG", "Continuous").unwrap();
        let b = book.create_evaluation("ALG", "Final only").unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(book.evaluations_for("ALG").unwrap().len(), 2);
        assert!(book.evaluations_for("FIS").unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_grades() {
        let book = book();
        let evaluation = book.create_evaluation("ALG", "Continuous").unwrap();

        let saved = book
            .save_evaluation(
                &evaluation,
                vec![draft("Midterm", "40", "8"), draft("Final", "60", "")],
            )
            .unwrap();
        assert_eq!(saved.grades.len(), 2);
        assert!((saved.final_mark() - 3.2).abs() < 1e-9);
        assert!((saved.pass_mark().unwrap() - 3.0).abs() < 1e-9);

        let resaved = book
            .save_evaluation(&saved, vec![draft("Project", "100", "7")])
            .unwrap();

        let stored = book.evaluation(evaluation.id).unwrap().unwrap();
        assert_eq!(stored, resaved);
        assert_eq!(stored.grades.len(), 1);
        assert_eq!(stored.grades[0].name, "Project");
        assert!(stored.grades.iter().all(|g| g.evaluation_id == evaluation.id));
        // Fresh ids on every save
        assert!(saved.grades.iter().all(|g| g.id != stored.grades[0].id));
    }

    #[test]
    fn test_grade_order_is_kept() {
        let book = book();
        let evaluation = book.create_evaluation("ALG", "Labs").unwrap();
        let names = ["L1", "L2", "L3", "L4", "L5", "L6", "L7", "L8", "L9", "L10", "L11"];
        let drafts = names.iter().map(|n| draft(n, "9", "")).collect();

        book.save_evaluation(&evaluation, drafts).unwrap();

        let stored = book.evaluation(evaluation.id).unwrap().unwrap();
        let stored_names: Vec<_> = stored.grades.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(stored_names, names);
    }

    #[test]
    fn test_delete_cascades() {
        let book = book();
        let keep = book.create_evaluation("ALG", "Keep").unwrap();
        let gone = book.create_evaluation("ALG", "Drop").unwrap();
        book.save_evaluation(&keep, vec![draft("A", "100", "5")]).unwrap();
        book.save_evaluation(&gone, vec![draft("B", "50", ""), draft("C", "50", "")])
            .unwrap();

        assert!(book.delete_evaluation(gone.id).unwrap());
        assert!(book.evaluation(gone.id).unwrap().is_none());
        assert!(!book.delete_evaluation(gone.id).unwrap());

        let remaining = book.evaluations().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].grades.len(), 1);
    }

    #[test]
    fn test_rename() {
        let book = book();
        let evaluation = book.create_evaluation("ALG", "Old").unwrap();
        book.save_evaluation(&evaluation, vec![draft("A", "100", "")]).unwrap();

        let renamed = book.rename_evaluation(evaluation.id, "New").unwrap().unwrap();
        assert_eq!(renamed.name, "New");
        assert_eq!(renamed.grades.len(), 1);
        assert!(book.rename_evaluation(999, "x").unwrap().is_none());
    }

    #[test]
    fn test_draft_validation() {
        assert_eq!(GradeDraft::parse(" ", "10", "", ""), Err(InvalidInput::Missing("name")));
        assert!(matches!(
            GradeDraft::parse("Exam", "abc", "", ""),
            Err(InvalidInput::NotANumber { field: "weight", .. })
        ));
        assert!(matches!(
            GradeDraft::parse("Exam", "50", "11", ""),
            Err(InvalidInput::OutOfRange { field: "mark", .. })
        ));
    }

    #[test]
    fn test_draft_compact_form() {
        let d = GradeDraft::parse_spec("Lab report:25:7.5:group work").unwrap();
        assert_eq!(d.name, "Lab report");
        assert_eq!(d.weight, 25.0);
        assert_eq!(d.mark, Some(7.5));
        assert_eq!(d.description, "group work");

        let pending = GradeDraft::parse_spec("Final:60").unwrap();
        assert_eq!(pending.mark, None);

        assert_eq!(GradeDraft::parse_spec("Final"), Err(InvalidInput::Missing("weight")));
    }

    #[tokio::test]
    async fn test_watch_sees_saves() {
        let book = book();
        let mut live = book.watch();
        assert!(live.next().await.unwrap().unwrap().is_empty());

        let evaluation = book.create_evaluation("ALG", "Continuous").unwrap();
        book.save_evaluation(&evaluation, vec![draft("A", "100", "6")]).unwrap();

        let snapshot = live.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].grades.len(), 1);
    }
}
