use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::services::page_ranges::parse_page_ranges;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// ========== Documents ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    pub page_number: u32,
    pub text: String,
    #[serde(default)]
    pub is_studied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub title: String,
    pub total_pages: u32,
    /// Canonical range string, see `services::page_ranges`.
    #[serde(default)]
    pub studied_pages: String,
    #[serde(default)]
    pub content_chunks: Vec<ContentChunk>,
    #[serde(default)]
    pub comprehension_score: Option<f64>,
    #[serde(default)]
    pub studied_pages_updated_at: Option<Timestamp>,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl Document {
    pub fn studied_page_set(&self) -> BTreeSet<u32> {
        parse_page_ranges(&self.studied_pages, self.total_pages)
    }

    pub fn studied_page_count(&self) -> usize {
        self.studied_page_set().len()
    }

    /// Fraction of pages studied. A document without pages counts as fully studied.
    pub fn studied_ratio(&self) -> f64 {
        if self.total_pages == 0 {
            return 1.0;
        }
        self.studied_page_count() as f64 / self.total_pages as f64
    }
}

// ========== Topics ==========

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseStats {
    pub appearances: u32,
    pub completed: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStats {
    pub appearances: u32,
    pub correct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub title: String,
    pub source_document_id: String,
    #[serde(default)]
    pub source_page_numbers: BTreeSet<u32>,
    #[serde(default)]
    pub affrontato: bool,
    #[serde(default)]
    pub exercise_stats: ExerciseStats,
    #[serde(default)]
    pub simulation_stats: SimulationStats,
    #[serde(default)]
    pub mastery_score: Option<u8>,
    #[serde(default)]
    pub last_practiced: Option<Timestamp>,
    #[serde(default)]
    pub last_studied: Option<Timestamp>,
}

// ========== Exercises ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Correctness {
    Correct,
    PartiallyCorrect,
    Incorrect,
    NotEvaluated,
}

impl Default for Correctness {
    fn default() -> Self {
        Self::NotEvaluated
    }
}

impl Correctness {
    /// Credit added to `completed`/`correct`; `None` means the outcome does
    /// not count as an appearance at all.
    pub fn credit(self) -> Option<f64> {
        match self {
            Self::Correct => Some(1.0),
            Self::PartiallyCorrect => Some(0.5),
            Self::Incorrect => Some(0.0),
            Self::NotEvaluated => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Correct | Self::PartiallyCorrect)
    }

    pub fn from_verdict(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "correct" => Some(Self::Correct),
            "partially-correct" | "partial" | "partially correct" => Some(Self::PartiallyCorrect),
            "incorrect" | "wrong" => Some(Self::Incorrect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::PartiallyCorrect => "partially-correct",
            Self::Incorrect => "incorrect",
            Self::NotEvaluated => "not-evaluated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self::from_verdict(s).unwrap_or(Self::NotEvaluated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExerciseStatus {
    InProgress,
    Submitted,
    Corrected,
}

impl ExerciseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Submitted => "submitted",
            Self::Corrected => "corrected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "submitted" => Self::Submitted,
            "corrected" => Self::Corrected,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseInstance {
    pub id: String,
    pub subject_name: String,
    pub topic_id: String,
    pub question: String,
    pub solution: String,
    pub user_answer: Option<String>,
    pub status: ExerciseStatus,
    pub correctness: Correctness,
    pub created_at: Timestamp,
    pub corrected_at: Option<Timestamp>,
}

// ========== Simulations ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    McTheory,
    OpenTheory,
    McExercise,
    OpenExercise,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 4] = [
        QuestionKind::McTheory,
        QuestionKind::OpenTheory,
        QuestionKind::McExercise,
        QuestionKind::OpenExercise,
    ];

    pub fn is_multiple_choice(self) -> bool {
        matches!(self, Self::McTheory | Self::McExercise)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::McTheory => "mc_theory",
            Self::OpenTheory => "open_theory",
            Self::McExercise => "mc_exercise",
            Self::OpenExercise => "open_exercise",
        }
    }

    pub fn default_points(self) -> f64 {
        if self.is_multiple_choice() {
            1.0
        } else {
            2.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStructure {
    pub mc_theory: u32,
    pub open_theory: u32,
    pub mc_exercise: u32,
    pub open_exercise: u32,
}

impl SimulationStructure {
    pub fn total(&self) -> u32 {
        self.mc_theory + self.open_theory + self.mc_exercise + self.open_exercise
    }

    pub fn count_of(&self, kind: QuestionKind) -> u32 {
        match kind {
            QuestionKind::McTheory => self.mc_theory,
            QuestionKind::OpenTheory => self.open_theory,
            QuestionKind::McExercise => self.mc_exercise,
            QuestionKind::OpenExercise => self.open_exercise,
        }
    }

    pub fn of_kinds(kinds: impl IntoIterator<Item = QuestionKind>) -> Self {
        let mut out = Self::default();
        for kind in kinds {
            match kind {
                QuestionKind::McTheory => out.mc_theory += 1,
                QuestionKind::OpenTheory => out.open_theory += 1,
                QuestionKind::McExercise => out.mc_exercise += 1,
                QuestionKind::OpenExercise => out.open_exercise += 1,
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer_index: Option<usize>,
    #[serde(default)]
    pub reference_answer: Option<String>,
    pub points: f64,
    #[serde(default)]
    pub source_topic_id: Option<String>,
    #[serde(default)]
    pub source_document_id: Option<String>,
    #[serde(default)]
    pub source_page_number: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: String,
    #[serde(default)]
    pub choice_index: Option<usize>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: String,
    pub correctness: Correctness,
    pub points_awarded: f64,
    pub max_points: f64,
    pub topic_id: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Taking,
    OralPending,
    Completed,
}

impl SimulationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Taking => "taking",
            Self::OralPending => "oral_pending",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "oral_pending" => Self::OralPending,
            "completed" => Self::Completed,
            _ => Self::Taking,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OralExam {
    #[serde(default)]
    pub transcript: Option<String>,
    pub oral_grade: f64,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    pub id: String,
    pub subject_name: String,
    pub requested_structure: SimulationStructure,
    pub questions: Vec<Question>,
    pub status: SimulationStatus,
    pub with_oral: bool,
    pub topic_ids: Vec<String>,
    pub source_document_ids: Vec<String>,
    #[serde(default)]
    pub answers: Vec<SubmittedAnswer>,
    #[serde(default)]
    pub outcomes: Vec<QuestionOutcome>,
    pub score: Option<f64>,
    pub total_points: f64,
    pub grade: Option<f64>,
    pub final_grade: Option<f64>,
    #[serde(default)]
    pub oral: Option<OralExam>,
    pub created_at: Timestamp,
    pub graded_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Simulation {
    pub fn references_document(&self, document_id: &str) -> bool {
        self.source_document_ids.iter().any(|id| id == document_id)
    }

    /// `score / totalPoints` once graded.
    pub fn score_ratio(&self) -> Option<f64> {
        let score = self.score?;
        if self.total_points <= 0.0 {
            return None;
        }
        Some((score / self.total_points).clamp(0.0, 1.0))
    }
}

// ========== Coach ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachTask {
    pub id: String,
    pub text: String,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachSyncRecord {
    pub subject_name: String,
    pub last_sync_timestamp: Option<Timestamp>,
    pub tasks: Vec<CoachTask>,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}
