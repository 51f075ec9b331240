//! Output comparison
//!
//! Pure functions: the same inputs always give the same answer, nothing is
//! read from or written to disk.

use serde::{Deserialize, Serialize};

const DEFAULT_EPSILON: f64 = 1e-6;

/// How program output is matched against the expected output
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "ModeRepr")]
pub enum ComparisonMode {
    /// Byte-for-byte
    Exact,
    /// Lines compared token by token; leading/trailing whitespace and
    /// trailing blank lines are ignored
    #[default]
    Whitespace,
    /// Whitespace-separated tokens, numbers equal within `epsilon`
    /// (absolute or relative), other tokens compared exactly
    Numeric { epsilon: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Match,
    Mismatch,
}

impl From<bool> for Comparison {
    fn from(matched: bool) -> Self {
        if matched {
            Comparison::Match
        } else {
            Comparison::Mismatch
        }
    }
}

/// Compare actual program output with the expected output
pub fn compare(actual: &[u8], expected: &[u8], mode: ComparisonMode) -> Comparison {
    match mode {
        ComparisonMode::Exact => (actual == expected).into(),
        ComparisonMode::Whitespace => {
            let actual = String::from_utf8_lossy(actual);
            let expected = String::from_utf8_lossy(expected);
            (normalized_lines(&actual) == normalized_lines(&expected)).into()
        }
        ComparisonMode::Numeric { epsilon } => {
            let actual = String::from_utf8_lossy(actual);
            let expected = String::from_utf8_lossy(expected);
            let mut actual = actual.split_whitespace();
            let mut expected = expected.split_whitespace();
            loop {
                match (actual.next(), expected.next()) {
                    (None, None) => return Comparison::Match,
                    (Some(a), Some(e)) if tokens_match(a, e, epsilon) => continue,
                    _ => return Comparison::Mismatch,
                }
            }
        }
    }
}

fn normalized_lines(text: &str) -> Vec<Vec<&str>> {
    let mut lines: Vec<Vec<&str>> = text
        .lines()
        .map(|line| line.split_whitespace().collect())
        .collect();
    while lines.last().is_some_and(|tokens| tokens.is_empty()) {
        lines.pop();
    }
    lines
}

fn tokens_match(actual: &str, expected: &str, epsilon: f64) -> bool {
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) if a.is_finite() && e.is_finite() => {
            let diff = (a - e).abs();
            diff <= epsilon || diff <= epsilon * a.abs().max(e.abs())
        }
        _ => actual == expected,
    }
}

/// Accepts `"exact"`, `"whitespace"`, `"numeric"` or
/// `{"numeric": {"epsilon": 1e-4}}`
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Name(String),
    Numeric { numeric: NumericOptions },
}

#[derive(Deserialize)]
struct NumericOptions {
    #[serde(default = "default_epsilon")]
    epsilon: f64,
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

impl TryFrom<ModeRepr> for ComparisonMode {
    type Error = String;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        let mode = match repr {
            ModeRepr::Name(name) => match name.to_lowercase().as_str() {
                "exact" | "strict" => ComparisonMode::Exact,
                "whitespace" | "standard" => ComparisonMode::Whitespace,
                "numeric" => ComparisonMode::Numeric {
                    epsilon: DEFAULT_EPSILON,
                },
                _ => return Err(format!("unknown comparison mode: {}", name)),
            },
            ModeRepr::Numeric { numeric } => ComparisonMode::Numeric {
                epsilon: numeric.epsilon,
            },
        };
        if let ComparisonMode::Numeric { epsilon } = mode {
            if !(epsilon.is_finite() && epsilon >= 0.0) {
                return Err(format!("invalid epsilon: {}", epsilon));
            }
        }
        Ok(mode)
    }
}
