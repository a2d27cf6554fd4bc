use std::io;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::TransformError;
use crate::value::to_text;

/// One output row: column name to value, in column order.
pub type Row = JsonMap<String, JsonValue>;

/// Column-ordered rows produced by a conversion.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Lays `rows` out in `columns` order; absent cells are `null`.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let rows = rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|column| row.remove(column).unwrap_or(JsonValue::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Stacks tables in order. Columns are the union in first-seen order.
    pub fn concat(tables: Vec<Table>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(tables.iter().map(Table::len).sum());
        for table in tables {
            if table.columns == columns {
                rows.extend(table.rows);
                continue;
            }
            let positions: Vec<Option<usize>> = columns
                .iter()
                .map(|column| table.columns.iter().position(|c| c == column))
                .collect();
            for row in table.rows {
                rows.push(
                    positions
                        .iter()
                        .map(|pos| pos.and_then(|idx| row.get(idx).cloned()).unwrap_or(JsonValue::Null))
                        .collect(),
                );
            }
        }
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&JsonValue>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn to_records(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Row>()
            })
            .collect()
    }

    pub fn write_csv<W: io::Write>(&self, writer: W, include_header: bool) -> Result<(), TransformError> {
        let mut csv = csv::Writer::from_writer(writer);
        self.write_csv_records(&mut csv, include_header)?;
        csv.flush()?;
        Ok(())
    }

    /// Writes into an existing CSV writer so chunks can share one output.
    pub(crate) fn write_csv_records<W: io::Write>(
        &self,
        csv: &mut csv::Writer<W>,
        include_header: bool,
    ) -> Result<(), TransformError> {
        if include_header {
            csv.write_record(&self.columns)?;
        }
        for row in &self.rows {
            csv.write_record(row.iter().map(to_text))?;
        }
        Ok(())
    }
}
