//! Structured data from free-text model output.
//!
//! Turn 2 yields a [`Verdict`]; turn 1 yields a descriptive
//! [`ReferenceAnalysis`].
//!
//! Verdict parsing is an ordered list of rules. The structured rules run
//! first; the keyword fallback runs only when none of them matched anything,
//! and its result is marked `heuristic` so callers can tell it apart.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

mod reference;

pub use reference::{parse_reference_analysis, ReferenceAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Correct,
    Incorrect,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "CORRECT",
            Self::Incorrect => "INCORRECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyType {
    Missing,
    Misplaced,
    IncorrectProduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancySeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub item: String,
    pub expected: String,
    #[serde(default)]
    pub found: String,
    #[serde(rename = "type")]
    pub kind: DiscrepancyType,
    pub severity: DiscrepancySeverity,
}

/// Summary attached to every fallback verdict.
pub const FALLBACK_SUMMARY: &str =
    "No structured verification markers found; outcome inferred from response keywords.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub outcome: Option<Outcome>,
    pub discrepancies: Vec<Discrepancy>,
    pub comparison_summary: String,
    /// True when the outcome came from the keyword fallback.
    pub heuristic: bool,
    /// Names of the rules that produced this verdict, in evaluation order.
    pub matched_rules: Vec<String>,
}

struct Patterns {
    outcome: Regex,
    discrepancy_block: Regex,
    misplaced: Regex,
    missing: Regex,
    wrong_product: Regex,
    summary: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        outcome: Regex::new(r"(?i)verification\s+outcome\s*\**\s*:\s*\**\s*(CORRECT|INCORRECT)\b")
            .expect("regex for verification outcome"),
        discrepancy_block: Regex::new(
            r"(?is)discrepancies\**\s*:\**[^\S\n]*(.*?)(?:\n[^\S\n]*\n|\n\*\*|\z)",
        )
        .expect("regex for discrepancies block"),
        misplaced: Regex::new(
            r"(?i)^\s*[-*]\s*(?P<item>[^:]+?)\s*:\s*expected\s+in\s+(?P<expected>[^,]+?)\s*,\s*found\s+in\s+(?P<found>[^,]+?)\s*(?:,.*|\.)?\s*$",
        )
        .expect("regex for misplaced discrepancy"),
        missing: Regex::new(
            r"(?i)^\s*[-*]\s*(?P<item>[^:]+?)\s*:\s*expected\s+in\s+(?P<expected>[^,]+?)\s*,\s*not\s+found\b",
        )
        .expect("regex for missing discrepancy"),
        wrong_product: Regex::new(
            r"(?i)^\s*[-*]\s*(?P<item>[^:]+?)\s*:\s*expected\s+(?P<expected>[^,]+?)\s*,\s*(?:but\s+)?found\s+(?P<found>[^,]+?)\s*(?:,.*|\.)?\s*$",
        )
        .expect("regex for incorrect product discrepancy"),
        summary: Regex::new(
            r"(?is)\*\*\s*comparison\s+summary\s*:?\s*\*\*\s*:?\s*(.*?)(?:\n[^\S\n]*\n|\n\*\*|\z)",
        )
        .expect("regex for comparison summary"),
    })
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn clean(value: &str) -> String {
    value.trim().trim_matches('*').trim().to_string()
}

fn parse_discrepancy_line(line: &str) -> Option<Discrepancy> {
    let patterns = patterns();
    let rules = [
        (
            &patterns.misplaced,
            DiscrepancyType::Misplaced,
            DiscrepancySeverity::Medium,
        ),
        (
            &patterns.missing,
            DiscrepancyType::Missing,
            DiscrepancySeverity::High,
        ),
        (
            &patterns.wrong_product,
            DiscrepancyType::IncorrectProduct,
            DiscrepancySeverity::Medium,
        ),
    ];
    rules.into_iter().find_map(|(regex, kind, severity)| {
        let caps = regex.captures(line)?;
        Some(Discrepancy {
            item: clean(&caps["item"]),
            expected: clean(&caps["expected"]),
            found: caps.name("found").map(|m| clean(m.as_str())).unwrap_or_default(),
            kind,
            severity,
        })
    })
}

/// Parse a turn-2 response into a verdict. Never fails.
pub fn parse_verdict(text: &str) -> Verdict {
    let patterns = patterns();
    let text = normalize_line_endings(text);
    let mut matched_rules = Vec::new();

    let outcome = patterns
        .outcome
        .captures(&text)
        .map(|caps| match caps[1].to_ascii_uppercase().as_str() {
            "INCORRECT" => Outcome::Incorrect,
            _ => Outcome::Correct,
        });
    if outcome.is_some() {
        matched_rules.push("outcome".to_string());
    }

    let discrepancies: Vec<Discrepancy> = patterns
        .discrepancy_block
        .captures(&text)
        .map(|caps| {
            caps[1]
                .lines()
                .filter_map(parse_discrepancy_line)
                .collect()
        })
        .unwrap_or_default();
    if !discrepancies.is_empty() {
        matched_rules.push("discrepancies".to_string());
    }

    let summary = patterns
        .summary
        .captures(&text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|summary| !summary.is_empty());
    if summary.is_some() {
        matched_rules.push("comparison_summary".to_string());
    }

    if !matched_rules.is_empty() {
        return Verdict {
            outcome,
            discrepancies,
            comparison_summary: summary.unwrap_or_default(),
            heuristic: false,
            matched_rules,
        };
    }
    fallback_verdict(&text)
}

fn fallback_verdict(text: &str) -> Verdict {
    let lowered = text.to_lowercase();
    let (outcome, rule) =
        if lowered.contains("all") && (lowered.contains("filled") || lowered.contains("products")) {
            (Outcome::Correct, "fallback_all_filled")
        } else if ["discrepanc", "missing", "incorrect"]
            .iter()
            .any(|word| lowered.contains(word))
        {
            (Outcome::Incorrect, "fallback_problem_keywords")
        } else {
            (Outcome::Correct, "fallback_default")
        };
    tracing::warn!(rule, "no structured markers in model response; using keyword fallback");
    Verdict {
        outcome: Some(outcome),
        discrepancies: Vec::new(),
        comparison_summary: FALLBACK_SUMMARY.to_string(),
        heuristic: true,
        matched_rules: vec![rule.to_string()],
    }
}

/// Apply the discrepancy business rules on top of the parsed outcome.
///
/// Any HIGH severity discrepancy, or at least `threshold` MISSING/MISPLACED
/// entries (when `threshold > 0`), makes the run INCORRECT. A changed outcome
/// gets an assessment note appended to the summary.
pub fn interpret_discrepancies(verdict: &Verdict, threshold: u32) -> Verdict {
    let mut interpreted = verdict.clone();
    let has_high = verdict
        .discrepancies
        .iter()
        .any(|d| d.severity == DiscrepancySeverity::High);
    let placement_count = verdict
        .discrepancies
        .iter()
        .filter(|d| matches!(d.kind, DiscrepancyType::Missing | DiscrepancyType::Misplaced))
        .count();
    let over_threshold = threshold > 0 && placement_count >= threshold as usize;

    if (has_high || over_threshold) && verdict.outcome != Some(Outcome::Incorrect) {
        interpreted.outcome = Some(Outcome::Incorrect);
        let note = format!(
            "Assessment: {} due to {} discrepancies.",
            Outcome::Incorrect.as_str(),
            verdict.discrepancies.len()
        );
        interpreted.comparison_summary = if verdict.comparison_summary.is_empty() {
            note
        } else {
            format!("{}\n\n{note}", verdict.comparison_summary)
        };
    }
    interpreted
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
