use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cognitive category of an aptitude question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtag {
    NumericalReasoning,
    LogicalReasoning,
    VerbalReasoning,
    SpatialReasoning,
    DataInterpretation,
    PatternRecognition,
}

impl Subtag {
    /// Fixed priority order, also used when widening a fallback search to sibling subtags.
    pub const ALL: [Subtag; 6] = [
        Subtag::NumericalReasoning,
        Subtag::LogicalReasoning,
        Subtag::VerbalReasoning,
        Subtag::SpatialReasoning,
        Subtag::DataInterpretation,
        Subtag::PatternRecognition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subtag::NumericalReasoning => "numerical_reasoning",
            Subtag::LogicalReasoning => "logical_reasoning",
            Subtag::VerbalReasoning => "verbal_reasoning",
            Subtag::SpatialReasoning => "spatial_reasoning",
            Subtag::DataInterpretation => "data_interpretation",
            Subtag::PatternRecognition => "pattern_recognition",
        }
    }
}

impl std::fmt::Display for Subtag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeLevel {
    MiddleSchool,
    HighSchool,
    HigherSecondary,
}

impl GradeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeLevel::MiddleSchool => "middle_school",
            GradeLevel::HighSchool => "high_school",
            GradeLevel::HigherSecondary => "higher_secondary",
        }
    }

    /// Fallback bank the grade draws from; higher secondary shares the high-school pool.
    pub fn bank_band(&self) -> BankBand {
        match self {
            GradeLevel::MiddleSchool => BankBand::MiddleSchool,
            GradeLevel::HighSchool | GradeLevel::HigherSecondary => BankBand::HighSchool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankBand {
    MiddleSchool,
    HighSchool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub subtag: Subtag,
    pub difficulty: u8,
    pub source: QuestionSource,
}

/// Parameters sent to the question provider.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionRequest {
    pub subtag: Subtag,
    pub difficulty: u8,
    pub grade_level: GradeLevel,
    pub exclude_texts: Vec<String>,
}

/// Student-facing projection of a question: no answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub text: String,
    pub options: BTreeMap<String, String>,
    pub subtag: Subtag,
    pub difficulty: u8,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            text: q.text.clone(),
            options: q.options.clone(),
            subtag: q.subtag,
            difficulty: q.difficulty,
        }
    }
}
