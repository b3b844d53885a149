//! Tabular values exchanged with the versioned database.
//!
//! A [`Table`] is an ordered set of named columns and rows of JSON cells.
//! It is what every read returns and what every write imports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::DoltError;
use crate::Result;

/// Column name used when a row index is flattened into the data.
pub const INDEX_COLUMN: &str = "index";

/// Rows of JSON cells under named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a table from columns and rows, rejecting rows of the wrong width.
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Append a row.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(DoltError::InvalidTable(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// One row as a column-name keyed map.
    pub fn row_map(&self, i: usize) -> Option<Map<String, Value>> {
        let row = self.rows.get(i)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
        )
    }

    /// Copy of this table with a leading `index` column holding `0..len`.
    ///
    /// Returns an unchanged copy if an `index` column is already present.
    pub fn with_row_index(&self) -> Table {
        if self.column_index(INDEX_COLUMN).is_some() {
            return self.clone();
        }
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(INDEX_COLUMN.to_string());
        columns.extend(self.columns.iter().cloned());

        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut out = Vec::with_capacity(row.len() + 1);
                out.push(Value::from(i as u64));
                out.extend(row.iter().cloned());
                out
            })
            .collect();

        Table { columns, rows }
    }

    /// Copy of this table without rows that hold null in any key column.
    pub fn drop_null_keys(&self, keys: &[String]) -> Result<Table> {
        let idx = keys
            .iter()
            .map(|k| {
                self.column_index(k)
                    .ok_or_else(|| DoltError::InvalidTable(format!("unknown key column: {k}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = self
            .rows
            .iter()
            .filter(|row| idx.iter().all(|&i| !row[i].is_null()))
            .cloned()
            .collect();

        Ok(Table {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Parse engine JSON output of the form `{"rows": [{col: value, ...}, ...]}`.
    ///
    /// Column order follows first appearance across rows. Empty output and
    /// a missing `rows` member both yield an empty table.
    pub fn from_json_rows(value: &Value) -> Result<Table> {
        let rows = match value {
            Value::Null => return Ok(Table::default()),
            Value::Object(obj) => match obj.get("rows") {
                None | Some(Value::Null) => return Ok(Table::default()),
                Some(Value::Array(rows)) => rows,
                Some(other) => {
                    return Err(DoltError::Parse(format!(
                        "expected rows array, found {other}"
                    )))
                }
            },
            Value::Array(rows) => rows,
            other => {
                return Err(DoltError::Parse(format!(
                    "expected result object, found {other}"
                )))
            }
        };

        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            let obj = row
                .as_object()
                .ok_or_else(|| DoltError::Parse(format!("row is not an object: {row}")))?;
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut table = Table::new(columns);
        for row in rows {
            if let Some(obj) = row.as_object() {
                let cells = table
                    .columns
                    .iter()
                    .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                table.rows.push(cells);
            }
        }
        Ok(table)
    }

    /// Render as CSV with a header row (RFC 4180 quoting).
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_line(&mut out, self.columns.iter().map(|c| c.as_str().into()));
        for row in &self.rows {
            push_csv_line(&mut out, row.iter().map(csv_cell));
        }
        out
    }

    /// Content-stable digest: SHA-256 over per-row hashes, index included.
    ///
    /// Two tables with the same columns and the same rows in the same order
    /// always share a digest.
    pub fn content_digest(&self) -> String {
        let mut outer = Sha256::new();
        for column in &self.columns {
            outer.update(column.as_bytes());
            outer.update([0u8]);
        }
        for (i, row) in self.rows.iter().enumerate() {
            let mut inner = Sha256::new();
            inner.update((i as u64).to_le_bytes());
            for cell in row {
                inner.update(cell.to_string().as_bytes());
                inner.update([0x1f]);
            }
            outer.update(inner.finalize());
        }
        hex::encode(outer.finalize())
    }
}

fn csv_cell(value: &Value) -> std::borrow::Cow<'_, str> {
    match value {
        Value::Null => "".into(),
        Value::String(s) => s.as_str().into(),
        other => other.to_string().into(),
    }
}

fn push_csv_line<'a>(out: &mut String, cells: impl Iterator<Item = std::borrow::Cow<'a, str>>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&cell);
        }
    }
    out.push('\n');
}
