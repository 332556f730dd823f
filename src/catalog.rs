//! Static teaching (PPGD) and assessment (PPDG) method reference data.

use std::collections::BTreeSet;

const TEACHING_METHODS: &[(&str, &str)] = &[
    ("TM1", "Explicit Teaching"),
    ("TM2", "Lecture"),
    ("TM3", "Guest Lecture"),
    ("TM4", "Inquiry"),
    ("TM5", "Game"),
    ("TM6", "Practice"),
    ("TM7", "Experiment"),
    ("TM8", "Internship, Field Trip"),
    ("TM9", "Discussion"),
    ("TM10", "Debates"),
    ("TM11", "Models"),
    ("TM12", "Simulation"),
    ("TM13", "Role Play"),
    ("TM14", "Problem Solving"),
    ("TM15", "Brainstorming"),
    ("TM16", "Case Study"),
    ("TM17", "Teamwork Learning"),
    ("TM18", "Project"),
    ("TM19", "Teaching Research Team"),
    ("TM20", "E-Learning"),
    ("TM21", "Guided Self-Study"),
    ("TM22", "Work Assignment"),
];

const ASSESSMENT_METHODS: &[(&str, &str, &[&str])] = &[
    ("EM1", "Attendance And Punctuality Assessment", &["TM1", "TM2", "TM3", "TM4"]),
    ("EM2", "Work Assignment Assessment", &["TM21", "TM22"]),
    ("EM3", "Oral Presentation Assessment", &["TM3", "TM10", "TM13"]),
    ("EM4", "Teamwork Assessment", &["TM9", "TM17"]),
    ("EM5", "Self-Study At The Library Assessment", &["TM21"]),
    ("EM6", "Written Exam", &["TM1", "TM2", "TM4"]),
    ("EM7", "Multiple Choice Exam", &["TM1", "TM2", "TM4"]),
    ("EM8", "Written Report/Essay Assessment", &["TM16", "TM18", "TM19"]),
    ("EM9", "Practical Assessment", &[]),
    ("EM10", "Project Assessment", &[]),
    ("EM11", "Practice In The Laboratory Assessment", &["TM6", "TM7", "TM8"]),
    ("EM12", "Major Assignment/Individual Project Assessment", &["TM18", "TM19"]),
    ("EM14", "Other Assessment", &[]),
];

const FORMATIVE: &[&str] = &["EM1", "EM2", "EM3", "EM4", "EM5"];
const SKILL_DEVELOPING: &[&str] = &["EM3", "EM4", "EM8", "EM11", "EM12"];
const PRACTICAL: &[&str] = &["EM4", "EM5"];
const DEFAULT_TEACHING: &[&str] = &["TM1", "TM2", "TM4", "TM9", "TM21"];

/// `"EM 1"`, `"em1"` and `"EM1"` all normalize to `"EM1"`.
pub fn normalize_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect::<String>()
        .to_uppercase()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MethodCatalog;

impl MethodCatalog {
    pub fn teaching_codes(&self) -> impl Iterator<Item = &'static str> {
        TEACHING_METHODS.iter().map(|(code, _)| *code)
    }

    pub fn assessment_codes(&self) -> impl Iterator<Item = &'static str> {
        ASSESSMENT_METHODS.iter().map(|(code, _, _)| *code)
    }

    pub fn teaching_name(&self, code: &str) -> Option<&'static str> {
        TEACHING_METHODS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
    }

    pub fn assessment_name(&self, code: &str) -> Option<&'static str> {
        ASSESSMENT_METHODS
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, name, _)| *name)
    }

    /// Teaching methods that support the given assessment method.
    pub fn compatible_teaching(&self, assessment: &str) -> &'static [&'static str] {
        ASSESSMENT_METHODS
            .iter()
            .find(|(c, _, _)| *c == assessment)
            .map(|(_, _, compatible)| *compatible)
            .unwrap_or(&[])
    }

    pub fn is_formative(&self, code: &str) -> bool {
        FORMATIVE.contains(&code)
    }

    pub fn is_skill_developing(&self, code: &str) -> bool {
        SKILL_DEVELOPING.contains(&code)
    }

    pub fn is_practical(&self, code: &str) -> bool {
        PRACTICAL.contains(&code)
    }

    pub fn default_teaching(&self) -> BTreeSet<String> {
        DEFAULT_TEACHING.iter().map(|c| c.to_string()).collect()
    }

    /// Display label such as `EM3 (Oral Presentation Assessment)`.
    pub fn describe(&self, code: &str) -> String {
        match self
            .assessment_name(code)
            .or_else(|| self.teaching_name(code))
        {
            Some(name) => format!("{code} ({name})"),
            None => code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_normalize_whitespace_and_case() {
        assert_eq!(normalize_code("EM 1"), "EM1");
        assert_eq!(normalize_code(" tm 21 "), "TM21");
        assert_eq!(normalize_code("EM11"), "EM11");
    }

    #[test]
    fn catalog_sizes_are_fixed() {
        let catalog = MethodCatalog;
        assert_eq!(catalog.teaching_codes().count(), 22);
        assert_eq!(catalog.assessment_codes().count(), 13);
    }

    #[test]
    fn compatibility_lookup() {
        let catalog = MethodCatalog;
        assert_eq!(catalog.compatible_teaching("EM4"), &["TM9", "TM17"]);
        assert!(catalog.compatible_teaching("EM14").is_empty());
        assert!(catalog.compatible_teaching("EM99").is_empty());
        assert_eq!(catalog.describe("EM2"), "EM2 (Work Assignment Assessment)");
    }
}
