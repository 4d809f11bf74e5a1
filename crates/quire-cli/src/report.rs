//! The composite report: one response with its student, advisor, survey,
//! answers and feedback history, rendered as a single PDF.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use quire_render::{FingerprintInputs, Renderable};

use crate::snapshot::{FeedbackRecord, PersonRecord, Relations, Snapshot};

/// Bump to invalidate every stored composite report.
pub const REPORT_FORMAT_VERSION: &str = "v2";

#[derive(Debug)]
pub struct CompositeReport {
    snapshot: Snapshot,
    max_evidence_history: usize,
}

impl CompositeReport {
    pub fn new(snapshot: Snapshot, max_evidence_history: usize) -> Self {
        Self {
            snapshot,
            max_evidence_history,
        }
    }

    pub fn open(path: &Path, max_evidence_history: usize) -> Result<Self> {
        Ok(Self::new(Snapshot::open(path)?, max_evidence_history))
    }

    pub fn response_id(&self) -> u64 {
        self.snapshot.response().id
    }

    /// Most recent feedback first, capped at `max_evidence_history`.
    fn evidence<'a>(&self, relations: &'a Relations) -> Vec<&'a FeedbackRecord> {
        let mut feedback: Vec<&FeedbackRecord> = relations.feedback.iter().collect();
        feedback.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        feedback.truncate(self.max_evidence_history);
        feedback
    }
}

impl Renderable for CompositeReport {
    fn cache_key(&self) -> String {
        format!("composite-report:{}", self.response_id())
    }

    fn describe(&self) -> String {
        format!("composite report for response {}", self.response_id())
    }

    fn fingerprint_inputs(&self) -> Result<FingerprintInputs> {
        let response = self.snapshot.response();
        let relations = self.snapshot.relations()?;
        Ok(FingerprintInputs::new(REPORT_FORMAT_VERSION)
            .identity("response", Some(response.id))
            .identity("student", relations.student.as_ref().map(|s| s.id))
            .identity("advisor", relations.advisor.as_ref().map(|a| a.id))
            .identity("survey", relations.survey.as_ref().map(|s| s.id))
            .timestamp("response", Some(response.updated_at))
            .timestamp("student", relations.student.as_ref().map(|s| s.updated_at))
            .timestamp("advisor", relations.advisor.as_ref().map(|a| a.updated_at))
            .timestamp("survey", relations.survey.as_ref().map(|s| s.updated_at))
            .collection_of("answers", relations.answers.iter().map(|a| a.touched_at()))
            .collection_of("feedback", relations.feedback.iter().map(|f| f.touched_at()))
            .value("evidence_cap", Some(&self.max_evidence_history.to_string()))
            .flag("completed", response.completed))
    }

    fn render_html(&self) -> Result<String> {
        let response = self.snapshot.response();
        let relations = self.snapshot.relations()?;
        let title = relations
            .survey
            .as_ref()
            .map_or("Survey response", |survey| survey.title.as_str());

        let mut html = String::new();
        writeln!(html, "<!DOCTYPE html>")?;
        writeln!(html, "<html><head><meta charset=\"utf-8\">")?;
        writeln!(html, "<title>{}</title></head><body>", escape(title))?;
        writeln!(html, "<h1>{}</h1>", escape(title))?;

        writeln!(html, "<dl>")?;
        writeln!(html, "<dt>Response</dt><dd>#{}</dd>", response.id)?;
        writeln!(html, "<dt>Student</dt><dd>{}</dd>", person(&relations.student))?;
        writeln!(html, "<dt>Advisor</dt><dd>{}</dd>", person(&relations.advisor))?;
        let status = if response.completed {
            "Complete"
        } else {
            "In progress"
        };
        writeln!(html, "<dt>Status</dt><dd>{status}</dd>")?;
        writeln!(html, "</dl>")?;

        writeln!(html, "<h2>Answers</h2>")?;
        if relations.answers.is_empty() {
            writeln!(html, "<p>No answers recorded.</p>")?;
        } else {
            writeln!(html, "<table><tr><th>Question</th><th>Answer</th></tr>")?;
            for answer in &relations.answers {
                writeln!(
                    html,
                    "<tr><td>{}</td><td>{}</td></tr>",
                    escape(&answer.question),
                    escape(&answer.value)
                )?;
            }
            writeln!(html, "</table>")?;
        }

        writeln!(html, "<h2>Feedback</h2>")?;
        let evidence = self.evidence(relations);
        if evidence.is_empty() {
            writeln!(html, "<p>No feedback yet.</p>")?;
        } else {
            if evidence.len() < relations.feedback.len() {
                writeln!(
                    html,
                    "<p>Showing the {} most recent of {} entries.</p>",
                    evidence.len(),
                    relations.feedback.len()
                )?;
            }
            writeln!(html, "<ul>")?;
            for entry in evidence {
                writeln!(
                    html,
                    "<li><strong>{}</strong>: {}</li>",
                    escape(&entry.author),
                    escape(&entry.body)
                )?;
            }
            writeln!(html, "</ul>")?;
        }

        writeln!(html, "</body></html>")?;
        Ok(html)
    }
}

fn person(record: &Option<PersonRecord>) -> String {
    record
        .as_ref()
        .map_or_else(|| "Unassigned".to_string(), |p| escape(&p.name))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{AnswerRecord, ResponseRecord, SurveyRecord};
    use quire_render::FingerprintComputer;

    fn response(id: u64) -> ResponseRecord {
        ResponseRecord {
            id,
            completed: false,
            updated_at: 1_000,
        }
    }

    fn feedback(id: u64, created_at: u64, body: &str) -> FeedbackRecord {
        FeedbackRecord {
            id,
            author: "Advisor".to_string(),
            body: body.to_string(),
            created_at,
            updated_at: None,
        }
    }

    fn relations() -> Relations {
        Relations {
            student: Some(PersonRecord {
                id: 7,
                name: "Ada".to_string(),
                updated_at: 10,
            }),
            advisor: None,
            survey: Some(SurveyRecord {
                id: 3,
                title: "Capstone review".to_string(),
                updated_at: 20,
            }),
            answers: vec![AnswerRecord {
                id: 1,
                question: "Goal?".to_string(),
                value: "Ship it".to_string(),
                created_at: 100,
                updated_at: None,
            }],
            feedback: vec![feedback(1, 200, "first")],
        }
    }

    fn report(relations: Relations) -> CompositeReport {
        CompositeReport::new(Snapshot::from_parts(response(42), relations), 10)
    }

    fn fingerprint(report: &CompositeReport) -> String {
        FingerprintComputer::new()
            .compute(report)
            .unwrap()
            .as_str()
            .to_string()
    }

    #[test]
    fn key_is_stable_and_names_the_response() {
        let report = report(relations());
        assert_eq!(report.cache_key(), "composite-report:42");
    }

    #[test]
    fn canonical_inputs_use_the_sentinel_for_absent_relations() {
        let canonical = report(relations()).fingerprint_inputs().unwrap().canonical();
        assert!(canonical.starts_with("v2|response=42|student=7|advisor=~|survey=3|"));
        assert!(canonical.contains("|answers.count=1|answers.latest=100|"));
        assert!(canonical.ends_with("|completed=false"));
    }

    #[test]
    fn new_feedback_changes_the_fingerprint() {
        let before = fingerprint(&report(relations()));
        let mut changed = relations();
        changed.feedback.push(feedback(2, 300, "second"));
        assert_ne!(before, fingerprint(&report(changed)));
    }

    #[test]
    fn edited_answer_changes_the_fingerprint() {
        let before = fingerprint(&report(relations()));
        let mut changed = relations();
        changed.answers[0].updated_at = Some(500);
        assert_ne!(before, fingerprint(&report(changed)));
    }

    #[test]
    fn evidence_cap_is_part_of_the_fingerprint() {
        let mut three = relations();
        three.feedback = (1..=3).map(|i| feedback(i, i * 10, "note")).collect();
        let open = |cap| CompositeReport::new(Snapshot::from_parts(response(42), three.clone()), cap);

        let (wide, narrow) = (open(10), open(1));
        assert_ne!(wide.render_html().unwrap(), narrow.render_html().unwrap());
        assert_ne!(fingerprint(&wide), fingerprint(&narrow));
        assert!(narrow
            .fingerprint_inputs()
            .unwrap()
            .canonical()
            .contains("|evidence_cap=1|"));
    }

    #[test]
    fn unchanged_data_keeps_the_fingerprint() {
        assert_eq!(
            fingerprint(&report(relations())),
            fingerprint(&report(relations()))
        );
    }

    #[test]
    fn html_lists_only_the_most_recent_feedback() {
        let mut many = relations();
        many.feedback = (1..=5).map(|i| feedback(i, i * 10, &format!("note {i}"))).collect();
        let report = CompositeReport::new(Snapshot::from_parts(response(42), many), 2);
        let html = report.render_html().unwrap();
        assert!(html.contains("note 5"));
        assert!(html.contains("note 4"));
        assert!(!html.contains("note 3"));
        assert!(html.contains("Showing the 2 most recent of 5 entries."));
        assert!(html.find("note 5") < html.find("note 4"));
    }

    #[test]
    fn html_escapes_record_text() {
        let mut hostile = relations();
        hostile.answers[0].value = "<script>alert('x')</script>".to_string();
        let html = report(hostile).render_html().unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[test]
    fn html_marks_missing_relations() {
        let html = report(Relations::default()).render_html().unwrap();
        assert!(html.contains("<dt>Advisor</dt><dd>Unassigned</dd>"));
        assert!(html.contains("No answers recorded."));
        assert!(html.contains("No feedback yet."));
    }
}
