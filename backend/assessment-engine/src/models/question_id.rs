use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref UUID_RE: Regex = Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
    )
    .unwrap();
    static ref COMPOSITE_RE: Regex = Regex::new(
        r"(?i)^(?P<section>.+)_(?P<uuid>[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$"
    )
    .unwrap();
}

/// A question identifier as submitted by the UI, classified once at the boundary.
///
/// The UI sends one of three shapes:
/// - a static catalogue id such as `riasec_r1`,
/// - a bare UUID of a generated question,
/// - `<section>_<uuid>`, a generated question prefixed with its section.
///
/// Only a trailing, complete UUID makes an id composite, so static ids that
/// contain underscores (`employability_skills_q3`) stay static.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionRef {
    Static { id: String },
    BareUuid { id: String },
    Composite { section_id: String, id: String },
}

impl QuestionRef {
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if UUID_RE.is_match(raw) {
            return QuestionRef::BareUuid { id: raw.to_string() };
        }
        if let Some(caps) = COMPOSITE_RE.captures(raw) {
            return QuestionRef::Composite {
                section_id: caps["section"].to_string(),
                id: caps["uuid"].to_string(),
            };
        }
        QuestionRef::Static { id: raw.to_string() }
    }

    pub fn question_id(&self) -> &str {
        match self {
            QuestionRef::Static { id }
            | QuestionRef::BareUuid { id }
            | QuestionRef::Composite { id, .. } => id,
        }
    }

    /// Section the question belongs to. Composite ids carry their own section,
    /// the other shapes belong to the section named by the caller.
    pub fn section_id<'a>(&'a self, requested_section: &'a str) -> &'a str {
        match self {
            QuestionRef::Composite { section_id, .. } => section_id,
            _ => requested_section,
        }
    }
}

pub fn is_uuid(s: &str) -> bool {
    UUID_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_splits_section_and_uuid() {
        let parsed = QuestionRef::classify("aptitude_f48f122d-bd34-408f-b45c-948dba1d4701");
        assert_eq!(
            parsed,
            QuestionRef::Composite {
                section_id: "aptitude".into(),
                id: "f48f122d-bd34-408f-b45c-948dba1d4701".into(),
            }
        );
        assert_eq!(parsed.section_id("riasec"), "aptitude");
        assert_eq!(parsed.question_id(), "f48f122d-bd34-408f-b45c-948dba1d4701");
    }

    #[test]
    fn static_id_keeps_requested_section() {
        let parsed = QuestionRef::classify("riasec_r1");
        assert_eq!(parsed, QuestionRef::Static { id: "riasec_r1".into() });
        assert_eq!(parsed.section_id("riasec"), "riasec");
    }

    #[test]
    fn bare_uuid_is_case_insensitive() {
        let parsed = QuestionRef::classify("F48F122D-BD34-408F-B45C-948DBA1D4701");
        assert!(matches!(parsed, QuestionRef::BareUuid { .. }));
        assert_eq!(parsed.section_id("knowledge"), "knowledge");
    }

    #[test]
    fn underscored_section_prefix_is_preserved() {
        let parsed =
            QuestionRef::classify("employability_skills_f48f122d-bd34-408f-b45c-948dba1d4701");
        assert_eq!(parsed.section_id("x"), "employability_skills");
    }

    #[test]
    fn underscores_without_uuid_stay_static() {
        let parsed = QuestionRef::classify("employability_skills_q3");
        assert!(matches!(parsed, QuestionRef::Static { .. }));
        // truncated UUID tail is not a UUID
        let parsed = QuestionRef::classify("aptitude_f48f122d-bd34-408f-b45c-948dba1d470");
        assert!(matches!(parsed, QuestionRef::Static { .. }));
    }
}
