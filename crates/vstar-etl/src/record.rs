//! In-memory raw record set
//!
//! A [`RecordSet`] is the fully materialized output of a record source: one
//! column schema shared by every row, rows kept in input order. Rows are
//! only handed out by shared reference, so a record never changes once read.

use std::collections::HashMap;
use vstar_common::{Column, ColumnType, Value};

use crate::error::{EtlError, Result};

/// Uniformly-shaped, ordered raw records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<Column>,
    positions: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    /// Create an empty record set with the given schema
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(EtlError::SourceRead(format!("column {} has an empty name", idx)));
            }
            if positions.insert(column.name.clone(), idx).is_some() {
                return Err(EtlError::SourceRead(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }

        Ok(Self {
            columns,
            positions,
            rows: Vec::new(),
        })
    }

    /// Create a record set and append all rows, validating each against the schema
    pub fn from_rows(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut set = Self::new(columns)?;
        set.rows.reserve(rows.len());
        for row in rows {
            set.push(row)?;
        }
        Ok(set)
    }

    /// Append a row. Its width and value types must match the schema.
    pub fn push(&mut self, row: Vec<Value>) -> Result<()> {
        let index = self.rows.len();
        if row.len() != self.columns.len() {
            return Err(EtlError::SourceRead(format!(
                "record {} has {} fields, expected {}",
                index,
                row.len(),
                self.columns.len()
            )));
        }

        for (value, column) in row.iter().zip(&self.columns) {
            if !conforms(value, column.ty) {
                return Err(EtlError::SourceRead(format!(
                    "record {} column '{}' expects {}, got {}",
                    index, column.name, column.ty, value
                )));
            }
        }

        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|idx| &self.columns[idx])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<RawRecord<'_>> {
        self.rows.get(index).map(|values| RawRecord { set: self, values })
    }

    pub fn records(&self) -> impl Iterator<Item = RawRecord<'_>> {
        self.rows.iter().map(move |values| RawRecord { set: self, values })
    }

    /// Resolve attribute names to column positions.
    ///
    /// Returns the first name the schema lacks as the error.
    pub fn projection(&self, attributes: &[String]) -> std::result::Result<Projection, String> {
        attributes
            .iter()
            .map(|name| self.position(name).ok_or_else(|| name.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(|positions| Projection { positions })
    }

    /// Replace a column's values, or append the column if it is new
    pub(crate) fn set_column(&mut self, column: Column, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(EtlError::SourceRead(format!(
                "column '{}' has {} values for {} records",
                column.name,
                values.len(),
                self.rows.len()
            )));
        }
        if let Some((idx, value)) = values.iter().enumerate().find(|(_, v)| !conforms(v, column.ty)) {
            return Err(EtlError::SourceRead(format!(
                "record {} column '{}' expects {}, got {}",
                idx, column.name, column.ty, value
            )));
        }

        match self.position(&column.name) {
            Some(idx) => {
                self.columns[idx] = column;
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            },
            None => {
                self.positions.insert(column.name.clone(), self.columns.len());
                self.columns.push(column);
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            },
        }

        Ok(())
    }
}

/// Borrowed view of one raw record
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    set: &'a RecordSet,
    values: &'a [Value],
}

impl<'a> RawRecord<'a> {
    /// Value of a named column; `None` if the schema has no such column
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.set.position(column).map(|idx| &self.values[idx])
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

/// Column positions of a dimension projection, resolved against one schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    positions: Vec<usize>,
}

impl Projection {
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Project a row onto the attribute tuple
    pub fn tuple(&self, row: &[Value]) -> Vec<Value> {
        self.positions.iter().map(|&idx| row[idx].clone()).collect()
    }
}

fn conforms(value: &Value, ty: ColumnType) -> bool {
    matches!(
        (value, ty),
        (Value::Null, _)
            | (Value::Int(_), ColumnType::Integer)
            | (Value::Float(_), ColumnType::Float)
            | (Value::Text(_), ColumnType::Text)
    )
}
