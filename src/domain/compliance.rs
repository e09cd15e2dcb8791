use std::fmt;

use super::bom::BomKind;

/// Verdict for a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Ok,
    Missing,
    Mismatch,
}

impl ValidationStatus {
    /// Symbol used in the validation table.
    pub fn symbol(&self) -> &'static str {
        match self {
            ValidationStatus::Ok => "✓",
            ValidationStatus::Missing => "✗",
            ValidationStatus::Mismatch => "≠",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Ok => write!(f, "OK"),
            ValidationStatus::Missing => write!(f, "MISSING"),
            ValidationStatus::Mismatch => write!(f, "MISMATCH"),
        }
    }
}

/// Live state of one component compared against its expected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub name: String,
    pub kind: BomKind,
    pub expected: String,
    pub actual: Option<String>,
    pub status: ValidationStatus,
}

impl ValidationResult {
    /// Compare by whole-string equality. Absence is MISSING; any other
    /// difference, including a value that merely contains the expected
    /// text, is MISMATCH.
    pub fn evaluate(
        name: impl Into<String>,
        kind: BomKind,
        expected: impl Into<String>,
        actual: Option<String>,
    ) -> Self {
        let expected = expected.into();
        let status = match actual.as_deref() {
            None => ValidationStatus::Missing,
            Some(value) if value == expected => ValidationStatus::Ok,
            Some(_) => ValidationStatus::Mismatch,
        };
        Self {
            name: name.into(),
            kind,
            expected,
            actual,
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }
}

/// Ordered per-component results plus the aggregate count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceReport {
    pub results: Vec<ValidationResult>,
    pub correct: usize,
    pub total: usize,
}

impl ComplianceReport {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        let correct = results.iter().filter(|r| r.is_ok()).count();
        let total = results.len();
        Self {
            results,
            correct,
            total,
        }
    }

    /// `correct / total`; an empty BOM counts as fully compliant.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn is_compliant(&self) -> bool {
        self.correct == self.total
    }

    pub fn get(&self, name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Non-OK results whose kind matches `pred`, in BOM order.
    pub fn failing<'a>(
        &'a self,
        pred: impl Fn(&BomKind) -> bool + 'a,
    ) -> impl Iterator<Item = &'a ValidationResult> + 'a {
        self.results
            .iter()
            .filter(move |r| !r.is_ok() && pred(&r.kind))
    }

    /// Replace the result for one component, keeping the counts in step.
    pub fn replace(&mut self, result: ValidationResult) {
        if let Some(slot) = self.results.iter_mut().find(|r| r.name == result.name) {
            *slot = result;
        } else {
            self.results.push(result);
        }
        self.correct = self.results.iter().filter(|r| r.is_ok()).count();
        self.total = self.results.len();
    }

    /// Rows for the validation table: component, expected, actual, symbol.
    pub fn table_rows(&self) -> Vec<[String; 4]> {
        self.results
            .iter()
            .map(|r| {
                [
                    r.name.clone(),
                    r.expected.clone(),
                    r.actual.clone().unwrap_or_else(|| "-".to_string()),
                    r.status.symbol().to_string(),
                ]
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} components compliant ({:.0}%)",
            self.correct,
            self.total,
            self.fraction() * 100.0
        )
    }
}
