//! Content checks against the rendered page

use serde::{Deserialize, Serialize};

use crate::browser::Element;
use crate::error::{SmokeError, SmokeResult};

/// What the page must render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentExpectation {
    pub selector: String,
    pub text: String,
}

impl Default for ContentExpectation {
    fn default() -> Self {
        Self {
            selector: "p".to_string(),
            text: "Hello World!".to_string(),
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: None,
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: Some(detail),
        }
    }
}

pub const ELEMENT_PRESENT: &str = "element present";
pub const TEXT_EQUALS: &str = "text equals";

/// All checks from one assertion phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionReport {
    pub checks: Vec<CheckResult>,
}

impl AssertionReport {
    /// True when there is at least one check and none failed
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn into_result(self) -> SmokeResult<Self> {
        if self.passed() {
            return Ok(self);
        }

        let summary = self
            .failures()
            .map(|c| match &c.detail {
                Some(detail) => format!("{}: {}", c.name, detail),
                None => c.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(SmokeError::AssertionFailed(summary))
    }

    /// Report for a lookup that errored before any element could be checked
    pub fn lookup_failed(selector: &str, error: &SmokeError) -> Self {
        Self {
            checks: vec![CheckResult::fail(
                ELEMENT_PRESENT,
                format!("lookup of '{}' failed: {}", selector, error),
            )],
        }
    }
}

/// Check that `found` exists and its text content is exactly `expected.text`.
///
/// Both checks are always reported; with no element the text check fails too.
pub fn check_element(found: Option<&Element>, expected: &ContentExpectation) -> AssertionReport {
    let checks = match found {
        None => vec![
            CheckResult::fail(
                ELEMENT_PRESENT,
                format!("no element matches '{}'", expected.selector),
            ),
            CheckResult::fail(TEXT_EQUALS, "no element to compare".to_string()),
        ],
        Some(element) if element.text_content == expected.text => vec![
            CheckResult::pass(ELEMENT_PRESENT),
            CheckResult::pass(TEXT_EQUALS),
        ],
        Some(element) => vec![
            CheckResult::pass(ELEMENT_PRESENT),
            CheckResult::fail(
                TEXT_EQUALS,
                format!("expected {:?}, got {:?}", expected.text, element.text_content),
            ),
        ],
    };

    AssertionReport { checks }
}
