//! Fact assembler
//!
//! Emits exactly one fact row per raw record, in input order. Each row
//! carries one foreign key per dimension and the record's measure columns.
//! A tuple with no matching dimension row aborts assembly; it is never
//! mapped to a default key.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};
use vstar_common::{Column, ColumnType, Value};

use crate::dimension::{Dimensions, SURROGATE_KEY_COLUMN};
use crate::error::{EtlError, Result};
use crate::record::{Projection, RecordSet};
use crate::sink::TableSchema;

/// Fact table configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSpec {
    pub name: String,

    /// Explicit measure columns. When absent, every numeric column that no
    /// dimension projects is a measure, in source order.
    #[serde(default)]
    pub measures: Option<Vec<String>>,
}

impl FactSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measures: None,
        }
    }

    pub fn with_measures<I, S>(mut self, measures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measures = Some(measures.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve measure columns against the record schema
    fn measure_columns(&self, records: &RecordSet, dimensions: &Dimensions) -> Result<Vec<Column>> {
        let projected: HashSet<&str> = dimensions
            .iter()
            .flat_map(|d| d.spec().attributes.iter().map(String::as_str))
            .collect();

        match &self.measures {
            Some(names) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .map(|name| {
                        if !seen.insert(name.as_str()) {
                            return Err(EtlError::Config(format!(
                                "fact '{}' lists measure '{}' twice",
                                self.name, name
                            )));
                        }
                        if projected.contains(name.as_str()) {
                            warn!(fact = %self.name, measure = %name, "Measure is also a dimension attribute");
                        }
                        records.column(name).cloned().ok_or_else(|| {
                            EtlError::Config(format!(
                                "fact '{}' measure '{}' is not in the source schema",
                                self.name, name
                            ))
                        })
                    })
                    .collect()
            },
            None => {
                let (measures, dropped): (Vec<&Column>, Vec<&Column>) = records
                    .columns()
                    .iter()
                    .filter(|c| !projected.contains(c.name.as_str()))
                    .partition(|c| c.ty != ColumnType::Text);

                if !dropped.is_empty() {
                    warn!(
                        fact = %self.name,
                        columns = ?dropped.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "Unprojected text columns are not measures and will not be loaded"
                    );
                }

                Ok(measures.into_iter().cloned().collect())
            },
        }
    }
}

/// One fact per raw record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    pub key: i64,
    /// One surrogate key per dimension, in dimension declaration order
    pub dimension_keys: Vec<i64>,
    pub measures: Vec<Value>,
}

impl FactRow {
    /// Row laid out as `(surrogate_key, dimension keys..., measures...)`
    pub fn to_row(&self) -> Vec<Value> {
        let mut row = Vec::with_capacity(1 + self.dimension_keys.len() + self.measures.len());
        row.push(Value::Int(self.key));
        row.extend(self.dimension_keys.iter().map(|&k| Value::Int(k)));
        row.extend(self.measures.iter().cloned());
        row
    }
}

/// Assembled fact table
#[derive(Debug, Clone)]
pub struct FactTable {
    name: String,
    foreign_keys: Vec<(String, String)>,
    measures: Vec<Column>,
    rows: Vec<FactRow>,
}

impl FactTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(dimension name, foreign key column)` pairs, in declaration order
    pub fn foreign_keys(&self) -> &[(String, String)] {
        &self.foreign_keys
    }

    pub fn measure_columns(&self) -> &[Column] {
        &self.measures
    }

    pub fn rows(&self) -> &[FactRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn table_schema(&self) -> TableSchema {
        let mut columns = Vec::with_capacity(1 + self.foreign_keys.len() + self.measures.len());
        columns.push(Column::new(SURROGATE_KEY_COLUMN, ColumnType::Integer));
        columns.extend(
            self.foreign_keys
                .iter()
                .map(|(_, column)| Column::new(column.clone(), ColumnType::Integer)),
        );
        columns.extend(self.measures.iter().cloned());
        TableSchema::new(self.name.clone(), columns)
    }

    pub fn table_rows(&self) -> Vec<Vec<Value>> {
        self.rows.iter().map(FactRow::to_row).collect()
    }
}

/// Resolve every record against every dimension and emit its fact row
pub fn assemble_facts(
    records: &RecordSet,
    dimensions: &Dimensions,
    spec: &FactSpec,
) -> Result<FactTable> {
    if spec.name.trim().is_empty() {
        return Err(EtlError::Config("fact table name is empty".to_string()));
    }

    let projections: Vec<Projection> = dimensions
        .iter()
        .map(|d| d.spec().validate(records))
        .collect::<Result<_>>()?;

    let measures = spec.measure_columns(records, dimensions)?;
    let measure_positions: Vec<usize> = measures
        .iter()
        .filter_map(|c| records.position(&c.name))
        .collect();

    let mut rows = Vec::with_capacity(records.len());
    for (record_index, row) in records.rows().iter().enumerate() {
        let mut dimension_keys = Vec::with_capacity(projections.len());
        for (dimension, projection) in dimensions.iter().zip(&projections) {
            let tuple = projection.tuple(row);
            let key = dimension.key_of(&tuple).ok_or_else(|| EtlError::UnresolvedForeignKey {
                record_index,
                dimension: dimension.name().to_string(),
                values: tuple.clone(),
            })?;
            dimension_keys.push(key);
        }

        rows.push(FactRow {
            key: record_index as i64 + 1,
            dimension_keys,
            measures: measure_positions.iter().map(|&idx| row[idx].clone()).collect(),
        });
    }

    debug!(
        fact = %spec.name,
        rows = rows.len(),
        dimensions = dimensions.len(),
        measures = measures.len(),
        "Assembled fact table"
    );

    Ok(FactTable {
        name: spec.name.clone(),
        foreign_keys: dimensions
            .iter()
            .map(|d| (d.name().to_string(), d.spec().foreign_key_column()))
            .collect(),
        measures,
        rows,
    })
}
