use serde_json::{Value, json};
use shared::{AssociationsView, StateMap, Viewport};
use std::collections::BTreeMap;

/// Alternative column spellings accepted on input, mapped to the names the
/// plot expects.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("#CHROM", "chr"),
    ("CHROM", "chr"),
    ("POS", "position"),
    ("P", "pvalue"),
    ("LOG10_P", "log_pvalue"),
    ("T_STAT", "scoreTestStat"),
    ("REF", "ref_allele"),
];

const REQUIRED_COLUMNS: &[&str] = &["ref_allele", "ALT", "chr", "position"];

#[derive(Debug, thiserror::Error)]
pub enum AssociationError {
    #[error("required column missing: {column} (row {row})")]
    MissingColumn { column: String, row: usize },
    #[error("neither `pvalue` nor `log_pvalue` (recommended) is present in row {row}")]
    MissingPvalue { row: usize },
    #[error("position {value} in row {row} is not an integer")]
    InvalidPosition { value: Value, row: usize },
    #[error("p-value {value} in row {row} is not a positive number")]
    InvalidPvalue { value: Value, row: usize },
    #[error("association rows are not a JSON array of objects: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One variant with its normalised columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    /// Position of the row in the input.
    pub row: usize,
    pub chr: String,
    pub position: i64,
    pub log_pvalue: f64,
    pub variant: String,
    pub fields: StateMap,
}

/// Association results grouped by chromosome.
#[derive(Debug, Clone, Default)]
pub struct AssociationTable {
    columns: Vec<String>,
    by_chrom: BTreeMap<String, Vec<Association>>,
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|number| number.fract() == 0.0)
            .map(|number| number as i64)
    })
}

impl AssociationTable {
    pub fn from_json_str(content: &str) -> Result<Self, AssociationError> {
        let rows: Vec<StateMap> = serde_json::from_str(content)?;
        Self::from_rows(rows)
    }

    pub fn from_rows(rows: Vec<StateMap>) -> Result<Self, AssociationError> {
        let mut table = AssociationTable::default();
        for (index, row) in rows.into_iter().enumerate() {
            let association = Self::normalize_row(row, index)?;
            for column in association.fields.keys() {
                if !table.columns.contains(column) {
                    table.columns.push(column.clone());
                }
            }
            table
                .by_chrom
                .entry(association.chr.clone())
                .or_default()
                .push(association);
        }
        Ok(table)
    }

    fn normalize_row(mut row: StateMap, index: usize) -> Result<Association, AssociationError> {
        for (alias, canonical) in COLUMN_ALIASES {
            if let Some(value) = row.remove(*alias) {
                row.insert(canonical.to_string(), value);
            }
        }

        for column in REQUIRED_COLUMNS {
            if !row.contains_key(*column) {
                return Err(AssociationError::MissingColumn {
                    column: column.to_string(),
                    row: index,
                });
            }
        }

        let chr = text(&row["chr"]);
        let position =
            integer(&row["position"]).ok_or_else(|| AssociationError::InvalidPosition {
                value: row["position"].clone(),
                row: index,
            })?;

        let stated = row.get("log_pvalue").and_then(Value::as_f64);
        let log_pvalue = match (stated, row.get("pvalue")) {
            (Some(log_pvalue), _) => log_pvalue,
            (None, Some(pvalue)) => match pvalue.as_f64() {
                Some(p) if p > 0.0 => -p.log10(),
                _ => {
                    return Err(AssociationError::InvalidPvalue {
                        value: pvalue.clone(),
                        row: index,
                    });
                }
            },
            (None, None) => return Err(AssociationError::MissingPvalue { row: index }),
        };

        let variant = format!(
            "{}:{}_{}/{}",
            chr,
            position,
            text(&row["ref_allele"]),
            text(&row["ALT"])
        );

        row.insert("chr".to_string(), json!(chr));
        row.insert("position".to_string(), json!(position));
        row.insert("log_pvalue".to_string(), json!(log_pvalue));
        row.insert("variant".to_string(), json!(variant));

        Ok(Association {
            row: index,
            chr,
            position,
            log_pvalue,
            variant,
            fields: row,
        })
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chrom.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_chromosome(&self, chr: &str) -> bool {
        self.by_chrom.contains_key(chr)
    }

    /// Strongest association (highest `log_pvalue`), optionally on one
    /// chromosome. Ties go to the row that came first in the input.
    pub fn top_locus(&self, chr: Option<&str>) -> Option<&Association> {
        let rows: Box<dyn Iterator<Item = &Association>> = match chr {
            Some(chr) => Box::new(self.by_chrom.get(chr).into_iter().flatten()),
            None => Box::new(self.by_chrom.values().flatten()),
        };
        rows.fold(None, |best: Option<&Association>, row| match best {
            Some(best)
                if best.log_pvalue > row.log_pvalue
                    || (best.log_pvalue == row.log_pvalue && best.row < row.row) =>
            {
                Some(best)
            }
            _ => Some(row),
        })
    }

    /// Rows inside `range`, both ends inclusive, as columns.
    pub fn view(&self, range: &Viewport) -> AssociationsView {
        let mut view = AssociationsView::empty(range.clone());
        let Some(rows) = self.by_chrom.get(&range.chr) else {
            return view;
        };
        let selected: Vec<&Association> = rows
            .iter()
            .filter(|row| range.contains(&row.chr, row.position))
            .collect();
        if selected.is_empty() {
            return view;
        }
        for column in &self.columns {
            let values = selected
                .iter()
                .map(|row| row.fields.get(column).cloned().unwrap_or(Value::Null))
                .collect();
            view.data.insert(column.clone(), values);
        }
        view
    }
}
