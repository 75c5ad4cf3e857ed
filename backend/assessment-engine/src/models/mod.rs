pub mod attempt;
pub mod question;
pub mod question_id;
pub mod response;
pub mod validation;

pub use attempt::{
    AbilityTier, Attempt, AttemptStatus, DifficultyChange, DifficultyTracker, SectionClosure,
    SectionState, SubtagProgress, TestPhase, TrajectoryPoint,
};
pub use question::{GradeLevel, Question, QuestionRequest, QuestionSource, QuestionView, Subtag};
pub use question_id::QuestionRef;
pub use response::{
    AnswerValue, AntiCheatSignals, ResponseKey, ResponsePattern, SaveOutcome,
    SaveResponseRequest, StoredResponse,
};
pub use validation::{ValidationResult, ValidationWarning, WarningCode, WarningSeverity};
