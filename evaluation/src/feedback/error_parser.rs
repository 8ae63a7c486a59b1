//! Compiler diagnostic classification
//!
//! Turns raw build-tool error text into structured findings so that each
//! failed attempt carries a categorized view of what went wrong, in addition
//! to the raw text that is fed back to the model.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

// GCC quotes with ASCII apostrophes in the C locale and with U+2018/U+2019
// otherwise; clang always uses ASCII.
static UNDECLARED_GCC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error: ['\x{2018}]([^'\x{2019}]+)['\x{2019}] was not declared").unwrap()
});

static UNDECLARED_CLANG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error: use of undeclared identifier '([^']+)'").unwrap()
});

static MISSING_TERMINATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error: expected (?:['\x{2018}],['\x{2019}] or )?['\x{2018}];['\x{2019}] (?:before|after|at end of)")
        .unwrap()
});

static INVALID_TYPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error: invalid types ['\x{2018}]([^'\x{2019}]+)['\x{2019}]").unwrap()
});

static CANNOT_CONVERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error: cannot convert ['\x{2018}]([^'\x{2019}]+)['\x{2019}]").unwrap()
});

static NO_MATCHING_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error: no matching (?:function|member function) for call to ['\x{2018}]([^'\x{2019}]+)['\x{2019}]")
        .unwrap()
});

static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^.*\berror: .*$").unwrap());

/// Finding categories, fixed taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Use of a name that is not in scope
    UndeclaredIdentifier,
    /// Missing `;` statement terminator
    MissingTerminator,
    /// Incompatible operand or conversion types
    TypeMismatch,
    /// No overload accepts the given arguments
    NoMatchingOverload,
    /// An `error:` line none of the other rules recognized
    Other,
}

impl ErrorCategory {
    /// Short hint appended to repair prompts when this category is present.
    pub fn repair_hint(&self) -> &'static str {
        match self {
            Self::UndeclaredIdentifier => {
                "declare every variable before use and include the headers that provide library names"
            }
            Self::MissingTerminator => "terminate every statement and declaration with `;`",
            Self::TypeMismatch => {
                "check numeric conversions and array element types carried over from Fortran"
            }
            Self::NoMatchingOverload => {
                "check argument counts, constness and types against the called function's signature"
            }
            Self::Other => "read the full diagnostic text",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndeclaredIdentifier => write!(f, "undeclared_identifier"),
            Self::MissingTerminator => write!(f, "missing_terminator"),
            Self::TypeMismatch => write!(f, "type_mismatch"),
            Self::NoMatchingOverload => write!(f, "no_matching_overload"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One classified occurrence in the diagnostics text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFinding {
    /// Category of the rule that matched
    pub category: ErrorCategory,
    /// The substring of the diagnostics that triggered classification
    pub raw_match: String,
    /// Offending identifier or type name, when the rule captures one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Byte offset of `raw_match` in the diagnostics text
    pub offset: usize,
}

/// A pattern mapped to a category.
struct PatternRule {
    category: ErrorCategory,
    pattern: &'static LazyLock<Regex>,
}

/// Classifier applying a fixed, ordered list of pattern rules.
pub struct DiagnosticClassifier {
    rules: Vec<PatternRule>,
    /// Emit `Other` findings for `error:` lines no rule matched
    report_unrecognized: bool,
}

impl Default for DiagnosticClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticClassifier {
    pub fn new() -> Self {
        use ErrorCategory::*;

        let rules = vec![
            PatternRule {
                category: UndeclaredIdentifier,
                pattern: &UNDECLARED_GCC,
            },
            PatternRule {
                category: UndeclaredIdentifier,
                pattern: &UNDECLARED_CLANG,
            },
            PatternRule {
                category: MissingTerminator,
                pattern: &MISSING_TERMINATOR,
            },
            PatternRule {
                category: TypeMismatch,
                pattern: &INVALID_TYPES,
            },
            PatternRule {
                category: TypeMismatch,
                pattern: &CANNOT_CONVERT,
            },
            PatternRule {
                category: NoMatchingOverload,
                pattern: &NO_MATCHING_CALL,
            },
        ];

        Self {
            rules,
            report_unrecognized: true,
        }
    }

    /// Only report findings for recognized patterns.
    pub fn without_unrecognized(mut self) -> Self {
        self.report_unrecognized = false;
        self
    }

    /// Classify diagnostics text.
    ///
    /// Findings are ordered by position in the text and are not
    /// deduplicated: a repeated error yields repeated findings.
    pub fn classify(&self, diagnostics: &str) -> ClassificationReport {
        let mut findings: Vec<(usize, ClassifiedFinding)> = Vec::new();

        for (rule_index, rule) in self.rules.iter().enumerate() {
            for caps in rule.pattern.captures_iter(diagnostics) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                findings.push((
                    rule_index,
                    ClassifiedFinding {
                        category: rule.category,
                        raw_match: whole.as_str().to_string(),
                        entity: caps.get(1).map(|m| m.as_str().to_string()),
                        offset: whole.start(),
                    },
                ));
            }
        }

        if self.report_unrecognized {
            let recognized: Vec<(usize, usize)> = findings
                .iter()
                .map(|(_, f)| (f.offset, f.offset + f.raw_match.len()))
                .collect();

            for line in ERROR_LINE.find_iter(diagnostics) {
                let covered = recognized
                    .iter()
                    .any(|&(start, end)| start < line.end() && end > line.start());
                if !covered {
                    findings.push((
                        self.rules.len(),
                        ClassifiedFinding {
                            category: ErrorCategory::Other,
                            raw_match: line.as_str().trim().to_string(),
                            entity: None,
                            offset: line.start(),
                        },
                    ));
                }
            }
        }

        findings.sort_by_key(|(rule_index, f)| (f.offset, *rule_index));

        ClassificationReport::from_findings(findings.into_iter().map(|(_, f)| f).collect())
    }
}

/// Findings plus summary counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Total finding count
    pub total: usize,
    /// Occurrences per category (only categories seen at least once)
    pub by_category: BTreeMap<ErrorCategory, usize>,
    /// Findings in order of occurrence
    pub findings: Vec<ClassifiedFinding>,
}

impl ClassificationReport {
    pub fn from_findings(findings: Vec<ClassifiedFinding>) -> Self {
        let mut by_category = BTreeMap::new();
        for finding in &findings {
            *by_category.entry(finding.category).or_insert(0) += 1;
        }

        Self {
            total: findings.len(),
            by_category,
            findings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn count(&self, category: ErrorCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    /// Category with the most occurrences (ties go to the earlier category)
    pub fn dominant_category(&self) -> Option<ErrorCategory> {
        self.by_category
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(category, _)| *category)
    }

    /// One-line summary for logs, e.g. `3 finding(s): undeclared_identifier=2, type_mismatch=1`
    ///
    /// Categories are listed in taxonomy order.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no findings".to_string();
        }
        let parts: Vec<String> = self
            .by_category
            .iter()
            .map(|(category, count)| format!("{}={}", category, count))
            .collect();
        format!("{} finding(s): {}", self.total, parts.join(", "))
    }

    /// Raw diagnostics followed by one hint per category seen.
    ///
    /// This is what goes into the repair prompt's `{diagnostics}` slot.
    pub fn annotate(&self, diagnostics: &str) -> String {
        if self.is_empty() {
            return diagnostics.to_string();
        }
        let mut out = diagnostics.trim_end().to_string();
        out.push_str("\n\nLikely fixes:");
        for category in self.by_category.keys() {
            out.push_str("\n- ");
            out.push_str(category.repair_hint());
        }
        out
    }
}
