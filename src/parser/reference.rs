//! Turn-1 reference image analysis.
//!
//! Turn 1 is descriptive only; nothing here affects the verdict. The fields
//! are best effort and left empty when the model ignores the requested
//! headers.
use crate::layout::MachineStructure;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceAnalysis {
    pub initial_confirmation: String,
    /// Structure the model reports seeing, when it states both counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_structure: Option<MachineStructure>,
    /// Row label to the model's one-line description of it.
    pub row_status: BTreeMap<String, String>,
    pub reference_summary: String,
}

struct Patterns {
    confirmation: Regex,
    rows_seen: Regex,
    columns_seen: Regex,
    row_block: Regex,
    row_line: Regex,
    summary: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        confirmation: Regex::new(r"(?is)\*\*INITIAL CONFIRMATION:\*\*\s*(.*?)\n\s*\*\*ROW STATUS ANALYSIS")
            .expect("regex for initial confirmation"),
        rows_seen: Regex::new(r"(?i)(\d+)\s+physical\s+rows\s*\((\w)-Top\s+to\s+(\w)-Bottom\)")
            .expect("regex for row count"),
        columns_seen: Regex::new(r"(?i)(\d+)\s+slots\s+per\s+row")
            .expect("regex for column count"),
        row_block: Regex::new(
            r"(?is)\*\*ROW STATUS ANALYSIS[^\n]*\n(.*?)\n\s*\*\*REFERENCE IMAGE SUMMARY",
        )
        .expect("regex for row status block"),
        row_line: Regex::new(r"^\s*[-*]\s*\*\*Row\s+(\w+)\s*(?:\([^)]*\))?:\*\*\s*(.*)$")
            .expect("regex for row status line"),
        summary: Regex::new(r"(?is)\*\*REFERENCE IMAGE SUMMARY:\*\*\s*(.*?)(?:\n\s*\*\*|\z)")
            .expect("regex for reference summary"),
    })
}

fn row_range(start: char, end: char) -> Vec<String> {
    if end < start {
        return Vec::new();
    }
    (start..=end).map(String::from).collect()
}

/// Pull the sections turn 1 asks for out of the model's answer.
pub fn parse_reference_analysis(text: &str) -> ReferenceAnalysis {
    let patterns = patterns();
    let text = text.replace("\r\n", "\n");
    let mut analysis = ReferenceAnalysis::default();

    if let Some(caps) = patterns.confirmation.captures(&text) {
        let section = caps[1].trim();
        analysis.initial_confirmation = section.to_string();
        let rows = patterns.rows_seen.captures(section).and_then(|rm| {
            let count = rm[1].parse::<u32>().ok()?;
            let start = rm[2].to_ascii_uppercase().chars().next()?;
            let end = rm[3].to_ascii_uppercase().chars().next()?;
            Some((count, row_range(start, end)))
        });
        let columns = patterns
            .columns_seen
            .captures(section)
            .and_then(|cm| cm[1].parse::<u32>().ok());
        if let (Some((row_count, row_order)), Some(columns_per_row)) = (rows, columns) {
            analysis.observed_structure = Some(MachineStructure {
                row_count,
                columns_per_row,
                row_order,
                column_order: (1..=columns_per_row).map(|i| format!("{i:02}")).collect(),
            });
        }
    }

    if let Some(caps) = patterns.row_block.captures(&text) {
        for line in caps[1].lines() {
            if let Some(rm) = patterns.row_line.captures(line) {
                analysis
                    .row_status
                    .insert(rm[1].to_string(), rm[2].trim().to_string());
            }
        }
    }

    if let Some(caps) = patterns.summary.captures(&text) {
        analysis.reference_summary = caps[1].trim().to_string();
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    const TURN1: &str = "**INITIAL CONFIRMATION:**\n\
Successfully identified 3 physical rows (A-Top to C-Bottom).\n\
Successfully identified 4 slots per row (01-Left to 04-Right).\n\
\n\
**ROW STATUS ANALYSIS (Reference Image):**\n\
* **Row A:** Coke in all four slots.\n\
* **Row B (middle):** Sprite in 01-03, 04 empty.\n\
* **Row C:** Water throughout.\n\
\n\
**REFERENCE IMAGE SUMMARY:**\n\
The machine is nearly full. One slot in row B is empty.\n";

    #[test]
    fn sections_are_extracted() {
        let analysis = parse_reference_analysis(TURN1);
        let structure = analysis.observed_structure.expect("structure");
        assert_eq!(structure.row_count, 3);
        assert_eq!(structure.row_order, vec!["A", "B", "C"]);
        assert_eq!(structure.columns_per_row, 4);
        assert_eq!(structure.column_order.last().map(String::as_str), Some("04"));
        assert_eq!(analysis.row_status.len(), 3);
        assert_eq!(analysis.row_status["B"], "Sprite in 01-03, 04 empty.");
        assert_eq!(
            analysis.reference_summary,
            "The machine is nearly full. One slot in row B is empty."
        );
        assert!(analysis.initial_confirmation.starts_with("Successfully identified 3"));
    }

    #[test]
    fn unstructured_text_yields_empty_fields() {
        let analysis = parse_reference_analysis("Looks like a vending machine.");
        assert_eq!(analysis, ReferenceAnalysis::default());
    }

    #[test]
    fn windows_line_endings_are_accepted() {
        let analysis = parse_reference_analysis(&TURN1.replace('\n', "\r\n"));
        assert_eq!(analysis.row_status.len(), 3);
    }
}
