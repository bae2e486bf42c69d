use std::cmp::Ordering;

use crate::db::operations::{documents, topics};
use crate::db::Store;
use crate::types::{Document, Timestamp, Topic};

/// Sort key for an undefined mastery: after every defined score.
const UNDEFINED_MASTERY: u16 = 101;

fn mastery_key(topic: &Topic) -> u16 {
    topic.mastery_score.map(u16::from).unwrap_or(UNDEFINED_MASTERY)
}

/// Never-practiced topics sort last.
fn last_practiced_key(topic: &Topic) -> Timestamp {
    topic.last_practiced.unwrap_or(Timestamp::MAX)
}

pub fn compare_topics(a: &Topic, b: &Topic) -> Ordering {
    mastery_key(a)
        .cmp(&mastery_key(b))
        .then_with(|| last_practiced_key(a).cmp(&last_practiced_key(b)))
}

/// Weakest topics first; ties keep input order.
pub fn rank_topics(topics: &[Topic]) -> Vec<&Topic> {
    let mut ranked: Vec<&Topic> = topics.iter().collect();
    ranked.sort_by(|a, b| compare_topics(a, b));
    ranked
}

/// The `k` least-studied documents.
pub fn study_focus(docs: &[Document], k: usize) -> Vec<&Document> {
    let mut ranked: Vec<(f64, &Document)> = docs.iter().map(|d| (d.studied_ratio(), d)).collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked.into_iter().take(k).map(|(_, d)| d).collect()
}

pub async fn ranked_topics(store: &Store, subject: &str) -> Result<Vec<Topic>, sqlx::Error> {
    let mut conn = store.pool().acquire().await?;
    let all = topics::list_topics(&mut conn, subject).await?;
    Ok(rank_topics(&all).into_iter().cloned().collect())
}

pub async fn study_focus_for_subject(store: &Store, subject: &str, k: usize) -> Result<Vec<Document>, sqlx::Error> {
    let mut conn = store.pool().acquire().await?;
    let docs = documents::list_documents(&mut conn, subject).await?;
    Ok(study_focus(&docs, k).into_iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: &str, mastery: Option<u8>, last_practiced: Option<i64>) -> Topic {
        Topic {
            id: id.into(),
            subject_name: "fisica".into(),
            title: String::new(),
            source_document_id: "d".into(),
            source_page_numbers: Default::default(),
            affrontato: false,
            exercise_stats: Default::default(),
            simulation_stats: Default::default(),
            mastery_score: mastery,
            last_practiced,
            last_studied: None,
        }
    }

    fn doc(id: &str, total: u32, studied: &str) -> Document {
        Document {
            id: id.into(),
            subject_name: "fisica".into(),
            title: String::new(),
            total_pages: total,
            studied_pages: studied.into(),
            content_chunks: vec![],
            comprehension_score: None,
            studied_pages_updated_at: None,
            created_at: 0,
        }
    }

    fn ids<'a>(ranked: impl IntoIterator<Item = &'a Topic>) -> Vec<&'a str> {
        ranked.into_iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_rank_by_mastery_then_recency() {
        let topics = vec![
            topic("a", Some(80), Some(5)),
            topic("b", None, None),
            topic("c", Some(20), Some(9)),
            topic("d", Some(20), Some(3)),
            topic("e", Some(100), None),
        ];
        assert_eq!(ids(rank_topics(&topics)), vec!["d", "c", "a", "e", "b"]);
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let topics = vec![
            topic("x", None, None),
            topic("y", None, None),
            topic("z", Some(50), None),
            topic("w", Some(50), None),
        ];
        assert_eq!(ids(rank_topics(&topics)), vec!["z", "w", "x", "y"]);
    }

    #[test]
    fn test_never_practiced_sorts_after_practiced() {
        let topics = vec![topic("new", Some(40), None), topic("old", Some(40), Some(1))];
        assert_eq!(ids(rank_topics(&topics)), vec!["old", "new"]);
    }

    #[test]
    fn test_study_focus_least_studied_first() {
        let docs = vec![
            doc("half", 10, "1-5"),
            doc("none", 10, ""),
            doc("empty", 0, ""),
            doc("most", 4, "1-3"),
        ];
        let focus: Vec<&str> = study_focus(&docs, 3).iter().map(|d| d.id.as_str()).collect();
        assert_eq!(focus, vec!["none", "half", "most"]);
    }

    #[test]
    fn test_study_focus_limit_larger_than_input() {
        let docs = vec![doc("a", 2, "1, 2")];
        assert_eq!(study_focus(&docs, 10).len(), 1);
        assert!(study_focus(&docs, 0).is_empty());
    }
}
