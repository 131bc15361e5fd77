//! Load-report diagnostics
//!
//! Connector-resolution problems never abort a document load; they are
//! collected here and surfaced to the host as a report. At worst an
//! individual spanning marking is missing from the loaded document.

use serde::{Deserialize, Serialize};

/// Severity level for diagnostic marks.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

/// A diagnostic mark tied to a document position.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DiagnosticMark {
    /// Measure index the problem was detected at (-1 if unknown).
    pub measure: i32,
    /// Track the problem was detected at (-1 if unknown).
    pub track: i32,
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Kind identifier (e.g., "connector_cycle", "connector_broken")
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl DiagnosticMark {
    pub fn new(
        measure: i32,
        track: i32,
        severity: DiagnosticSeverity,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            measure,
            track,
            severity,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Collection of diagnostic marks for one document load.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Diagnostics {
    pub marks: Vec<DiagnosticMark>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self { marks: Vec::new() }
    }

    pub fn add(&mut self, mark: DiagnosticMark) {
        self.marks.push(mark);
    }

    pub fn extend(&mut self, marks: impl IntoIterator<Item = DiagnosticMark>) {
        self.marks.extend(marks);
    }

    pub fn has_errors(&self) -> bool {
        self.marks
            .iter()
            .any(|m| m.severity == DiagnosticSeverity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Marks with the given kind identifier.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a DiagnosticMark> {
        self.marks.iter().filter(move |m| m.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_has_no_errors() {
        let diags = Diagnostics::new();
        assert!(diags.is_empty());
        assert!(!diags.has_errors());
    }

    #[test]
    fn warning_is_not_an_error() {
        let mut diags = Diagnostics::new();
        diags.add(DiagnosticMark::new(
            0,
            0,
            DiagnosticSeverity::Warning,
            "connector_broken",
            "chain missing its end",
        ));
        assert!(!diags.has_errors());
        assert_eq!(diags.of_kind("connector_broken").count(), 1);
    }

    #[test]
    fn serializes_to_json() {
        let mut diags = Diagnostics::new();
        diags.add(DiagnosticMark::new(
            2,
            1,
            DiagnosticSeverity::Error,
            "connector_cycle",
            "circular connector chain",
        ));
        let json = serde_json::to_string(&diags).unwrap();
        assert!(json.contains("connector_cycle"));
        assert!(json.contains("\"error\""));
    }
}
