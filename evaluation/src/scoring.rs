//! Similarity between a candidate translation and a reference translation.
//!
//! `NgramScorer` is deterministic: the same pair of inputs always yields the
//! same score. It blends two components, both over code tokens with comments
//! stripped:
//!
//! - smoothed BLEU-4 with brevity penalty
//! - keyword-weighted unigram match (language keywords count more than
//!   identifiers and punctuation)

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Similarity between a reference and a candidate, in `[0, 1]`.
pub trait QualityScorer: Send + Sync {
    fn score(&self, reference: &str, candidate: &str) -> f64;
}

// ---------------------------------------------------------------------------
// Tokenization
// ---------------------------------------------------------------------------

static COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").unwrap()
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|\d+(?:\.\d+)?(?:[eE][+-]?\d+)?|::|->|<<|>>|[<>=!]=|&&|\|\||\+\+|--|\S")
        .unwrap()
});

fn tokenize(code: &str) -> Vec<String> {
    let stripped = COMMENT.replace_all(code, " ");
    TOKEN
        .find_iter(&stripped)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// C++ keywords and common standard-library names weighted as keywords.
const CPP_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "catch", "char", "class", "const", "constexpr", "continue",
    "default", "delete", "do", "double", "else", "enum", "explicit", "extern", "false", "float",
    "for", "if", "inline", "int", "long", "namespace", "new", "noexcept", "nullptr", "operator",
    "private", "protected", "public", "return", "short", "signed", "size_t", "sizeof", "static",
    "static_cast", "std", "struct", "switch", "template", "this", "throw", "true", "try",
    "typedef", "typename", "unsigned", "using", "vector", "virtual", "void", "while",
];

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

const MAX_ORDER: usize = 4;
const WEIGHT_BLEU: f64 = 0.5;
const WEIGHT_KEYWORD_MATCH: f64 = 0.5;
const KEYWORD_WEIGHT: f64 = 1.0;
const OTHER_TOKEN_WEIGHT: f64 = 0.2;

/// Deterministic n-gram similarity for C-family code.
#[derive(Debug, Clone)]
pub struct NgramScorer {
    keywords: Vec<String>,
}

impl Default for NgramScorer {
    fn default() -> Self {
        Self::with_keywords(CPP_KEYWORDS.iter().copied())
    }
}

impl NgramScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    fn token_weight(&self, token: &str) -> f64 {
        if self.keywords.iter().any(|k| k == token) {
            KEYWORD_WEIGHT
        } else {
            OTHER_TOKEN_WEIGHT
        }
    }

    /// Smoothed BLEU-4. Orders with no candidate n-grams (very short
    /// candidates) are left out of the geometric mean.
    fn bleu(reference: &[String], candidate: &[String]) -> f64 {
        let mut log_sum = 0.0;
        let mut orders = 0usize;

        for n in 1..=MAX_ORDER {
            let total = candidate.len().saturating_sub(n - 1);
            if total == 0 {
                break;
            }
            let matches = clipped_matches(reference, candidate, n);
            let precision = if n == 1 {
                matches as f64 / total as f64
            } else {
                // Add-one smoothing for higher orders.
                (matches as f64 + 1.0) / (total as f64 + 1.0)
            };
            if precision == 0.0 {
                return 0.0;
            }
            log_sum += precision.ln();
            orders += 1;
        }

        if orders == 0 {
            return 0.0;
        }
        brevity_penalty(reference.len(), candidate.len()) * (log_sum / orders as f64).exp()
    }

    /// Unigram precision where each token counts by its keyword weight.
    fn keyword_match(&self, reference: &[String], candidate: &[String]) -> f64 {
        let mut available = counts(reference, 1);
        let mut matched = 0.0;
        let mut total = 0.0;

        for token in candidate {
            let weight = self.token_weight(token);
            total += weight;
            if let Some(left) = available.get_mut(std::slice::from_ref(token)) {
                if *left > 0 {
                    *left -= 1;
                    matched += weight;
                }
            }
        }

        if total == 0.0 {
            return 0.0;
        }
        brevity_penalty(reference.len(), candidate.len()) * matched / total
    }
}

impl QualityScorer for NgramScorer {
    fn score(&self, reference: &str, candidate: &str) -> f64 {
        let candidate = tokenize(candidate);
        if candidate.is_empty() {
            return 0.0;
        }
        let reference = tokenize(reference);

        let score = WEIGHT_BLEU * Self::bleu(&reference, &candidate)
            + WEIGHT_KEYWORD_MATCH * self.keyword_match(&reference, &candidate);
        score.clamp(0.0, 1.0)
    }
}

fn counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut map = HashMap::new();
    for gram in tokens.windows(n) {
        *map.entry(gram).or_insert(0) += 1;
    }
    map
}

fn clipped_matches(reference: &[String], candidate: &[String], n: usize) -> usize {
    let reference = counts(reference, n);
    counts(candidate, n)
        .into_iter()
        .map(|(gram, count)| count.min(reference.get(gram).copied().unwrap_or(0)))
        .sum()
}

fn brevity_penalty(reference_len: usize, candidate_len: usize) -> f64 {
    if candidate_len == 0 {
        0.0
    } else if candidate_len >= reference_len {
        1.0
    } else {
        (1.0 - reference_len as f64 / candidate_len as f64).exp()
    }
}
