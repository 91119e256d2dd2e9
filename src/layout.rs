//! Planogram layout metadata and the initialize-stage request.
//!
//! A layout describes which product belongs in each slot of the machine. It is
//! written once per run as `processing/layout-metadata` and feeds the prompt
//! templates for both turns.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStructure {
    pub row_count: u32,
    pub columns_per_row: u32,
    /// Top to bottom. Generated as `A, B, ...` when omitted.
    #[serde(default)]
    pub row_order: Vec<String>,
    /// Left to right. Generated as `01, 02, ...` when omitted.
    #[serde(default)]
    pub column_order: Vec<String>,
}

impl MachineStructure {
    pub fn rows(&self) -> Vec<String> {
        if !self.row_order.is_empty() {
            return self.row_order.clone();
        }
        (0..self.row_count)
            .filter_map(|index| char::from_u32('A' as u32 + index))
            .map(String::from)
            .collect()
    }

    pub fn columns(&self) -> Vec<String> {
        if !self.column_order.is_empty() {
            return self.column_order.clone();
        }
        (1..=self.columns_per_row)
            .map(|index| format!("{index:02}"))
            .collect()
    }

    pub fn slot_count(&self) -> u32 {
        self.row_count * self.columns_per_row
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPosition {
    pub product_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetadata {
    pub layout_id: i64,
    #[serde(default)]
    pub layout_prefix: String,
    pub vending_machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub machine_structure: MachineStructure,
    /// Slot label (`A01`) to the product planned for it.
    #[serde(default)]
    pub product_positions: BTreeMap<String, ProductPosition>,
}

impl LayoutMetadata {
    /// Check the layout is usable for prompting. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.vending_machine_id.trim().is_empty() {
            problems.push("vendingMachineId is empty".to_string());
        }
        if self.layout_id <= 0 {
            problems.push(format!("layoutId must be positive (got {})", self.layout_id));
        }
        let structure = &self.machine_structure;
        if structure.row_count == 0 || structure.columns_per_row == 0 {
            problems.push("machineStructure must have at least one row and column".to_string());
        }
        if structure.row_count > 26 {
            problems.push(format!(
                "machineStructure.rowCount {} exceeds 26",
                structure.row_count
            ));
        }
        if !structure.row_order.is_empty()
            && structure.row_order.len() != structure.row_count as usize
        {
            problems.push(format!(
                "rowOrder has {} entries but rowCount is {}",
                structure.row_order.len(),
                structure.row_count
            ));
        }
        if !structure.column_order.is_empty()
            && structure.column_order.len() != structure.columns_per_row as usize
        {
            problems.push(format!(
                "columnOrder has {} entries but columnsPerRow is {}",
                structure.column_order.len(),
                structure.columns_per_row
            ));
        }
        let rows = structure.rows();
        let columns = structure.columns();
        for slot in self.product_positions.keys() {
            let known = rows.iter().any(|row| {
                slot.strip_prefix(row.as_str())
                    .is_some_and(|column| columns.iter().any(|c| c == column))
            });
            if !known {
                problems.push(format!("product position {slot} is outside the machine"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// One line per row: `Row A: 01 Coke, 02 Sprite, 03 (empty)`.
    pub fn planogram_lines(&self) -> Vec<String> {
        let columns = self.machine_structure.columns();
        self.machine_structure
            .rows()
            .iter()
            .map(|row| {
                let slots = columns
                    .iter()
                    .map(|column| {
                        let product = self
                            .product_positions
                            .get(&format!("{row}{column}"))
                            .map_or("(empty)", |position| position.product_name.as_str());
                        format!("{column} {product}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Row {row}: {slots}")
            })
            .collect()
    }
}

/// Raw image bytes as handed to the initialize stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    /// Format from the upload's content type or file extension, if known.
    pub declared_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitRequest {
    /// Generated from the clock when absent.
    pub verification_id: Option<String>,
    pub layout: LayoutMetadata,
    pub reference_image: ImageUpload,
    pub checking_image: ImageUpload,
    pub historical_context: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> LayoutMetadata {
        LayoutMetadata {
            layout_id: 23591,
            layout_prefix: "lay".into(),
            vending_machine_id: "VM-3245".into(),
            location: Some("Office Building A".into()),
            machine_structure: MachineStructure {
                row_count: 2,
                columns_per_row: 3,
                row_order: Vec::new(),
                column_order: Vec::new(),
            },
            product_positions: BTreeMap::from([
                (
                    "A01".to_string(),
                    ProductPosition {
                        product_name: "Coke".into(),
                        product_id: Some("p-1".into()),
                    },
                ),
                (
                    "B03".to_string(),
                    ProductPosition {
                        product_name: "Sprite".into(),
                        product_id: None,
                    },
                ),
            ]),
        }
    }

    #[test]
    fn rows_and_columns_are_generated_when_omitted() {
        let structure = layout().machine_structure;
        assert_eq!(structure.rows(), vec!["A", "B"]);
        assert_eq!(structure.columns(), vec!["01", "02", "03"]);
        assert_eq!(structure.slot_count(), 6);
    }

    #[test]
    fn planogram_lines_mark_empty_slots() {
        assert_eq!(
            layout().planogram_lines(),
            vec![
                "Row A: 01 Coke, 02 (empty), 03 (empty)",
                "Row B: 01 (empty), 02 (empty), 03 Sprite",
            ]
        );
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut bad = layout();
        bad.vending_machine_id = " ".into();
        bad.layout_id = 0;
        bad.product_positions.insert(
            "C01".into(),
            ProductPosition {
                product_name: "Water".into(),
                product_id: None,
            },
        );
        let problems = bad.validate().unwrap_err();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(layout().validate().is_ok());
    }

    #[test]
    fn layout_json_uses_camel_case() {
        let json = serde_json::to_value(layout()).expect("serialize");
        assert_eq!(json["vendingMachineId"], "VM-3245");
        assert_eq!(json["machineStructure"]["columnsPerRow"], 3);
        assert_eq!(json["productPositions"]["A01"]["productName"], "Coke");
    }
}
