//! Dimension builder
//!
//! A dimension holds the distinct attribute tuples of one projection, each
//! with a dense surrogate key `1..=N` assigned in first-occurrence order.
//! Tuple equality is [`Value`] equality: nulls in the same position group
//! together and never match a present value.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use vstar_common::{Column, ColumnType, Value};

use crate::error::{EtlError, Result};
use crate::record::{Projection, RecordSet};
use crate::sink::TableSchema;

/// Name of the surrogate key column in every star-schema table
pub const SURROGATE_KEY_COLUMN: &str = "surrogate_key";

/// A named, ordered attribute projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub name: String,
    pub attributes: Vec<String>,
}

impl DimensionSpec {
    pub fn new<I, S>(name: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    /// Foreign key column the fact table uses for this dimension
    pub fn foreign_key_column(&self) -> String {
        format!("{}_key", self.name)
    }

    /// Check the projection against a record schema
    pub fn validate(&self, records: &RecordSet) -> Result<Projection> {
        if self.name.trim().is_empty() {
            return Err(EtlError::dimension(&self.name, "name is empty"));
        }
        if self.attributes.is_empty() {
            return Err(EtlError::dimension(&self.name, "no attributes configured"));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.attributes.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(EtlError::dimension(
                &self.name,
                format!("attribute '{}' listed twice", dup),
            ));
        }

        records.projection(&self.attributes).map_err(|missing| {
            EtlError::dimension(
                &self.name,
                format!("attribute '{}' is not in the source schema", missing),
            )
        })
    }
}

/// One distinct attribute tuple and its surrogate key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionRow {
    pub key: i64,
    pub values: Vec<Value>,
}

impl DimensionRow {
    /// Row laid out as `(surrogate_key, attributes...)`
    pub fn to_row(&self) -> Vec<Value> {
        let mut row = Vec::with_capacity(self.values.len() + 1);
        row.push(Value::Int(self.key));
        row.extend(self.values.iter().cloned());
        row
    }
}

/// A built, immutable dimension
#[derive(Debug, Clone)]
pub struct Dimension {
    spec: DimensionSpec,
    columns: Vec<Column>,
    rows: Vec<DimensionRow>,
    keys: HashMap<Vec<Value>, i64>,
}

impl Dimension {
    /// Scan records in input order, keying each tuple the first time it appears
    pub fn build(spec: &DimensionSpec, records: &RecordSet) -> Result<Self> {
        let projection = spec.validate(records)?;

        let columns: Vec<Column> = projection
            .positions()
            .iter()
            .map(|&idx| records.columns()[idx].clone())
            .collect();

        let mut rows: Vec<DimensionRow> = Vec::new();
        let mut keys: HashMap<Vec<Value>, i64> = HashMap::new();

        for row in records.rows() {
            let tuple = projection.tuple(row);
            if keys.contains_key(&tuple) {
                continue;
            }
            let key = rows.len() as i64 + 1;
            keys.insert(tuple.clone(), key);
            rows.push(DimensionRow { key, values: tuple });
        }

        debug!(
            dimension = %spec.name,
            distinct = rows.len(),
            records = records.len(),
            "Built dimension"
        );

        Ok(Self {
            spec: spec.clone(),
            columns,
            rows,
            keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &DimensionSpec {
        &self.spec
    }

    /// Attribute columns, in projection order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[DimensionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Surrogate key of an exact attribute tuple
    pub fn key_of(&self, tuple: &[Value]) -> Option<i64> {
        self.keys.get(tuple).copied()
    }

    pub fn row(&self, key: i64) -> Option<&DimensionRow> {
        usize::try_from(key)
            .ok()
            .and_then(|k| k.checked_sub(1))
            .and_then(|idx| self.rows.get(idx))
    }

    pub fn table_schema(&self) -> TableSchema {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(Column::new(SURROGATE_KEY_COLUMN, ColumnType::Integer));
        columns.extend(self.columns.iter().cloned());
        TableSchema::new(self.spec.name.clone(), columns)
    }

    pub fn table_rows(&self) -> Vec<Vec<Value>> {
        self.rows.iter().map(DimensionRow::to_row).collect()
    }
}

/// All dimensions of a run, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Dimensions {
    dimensions: Vec<Dimension>,
}

impl Dimensions {
    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter()
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

impl FromIterator<Dimension> for Dimensions {
    fn from_iter<T: IntoIterator<Item = Dimension>>(iter: T) -> Self {
        Self {
            dimensions: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dimensions {
    type Item = &'a Dimension;
    type IntoIter = std::slice::Iter<'a, Dimension>;

    fn into_iter(self) -> Self::IntoIter {
        self.dimensions.iter()
    }
}

/// Build every dimension, one pass each, in declaration order
pub fn build_dimensions(records: &RecordSet, specs: &[DimensionSpec]) -> Result<Dimensions> {
    let mut names = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(EtlError::dimension(&spec.name, "dimension declared twice"));
        }
        // Fail on any malformed spec before doing work for the others
        spec.validate(records)?;
    }

    specs
        .iter()
        .map(|spec| Dimension::build(spec, records))
        .collect()
}
