//! Record sources
//!
//! A source yields the complete raw dataset before any dimension work
//! begins. Any failure to do so is a `SourceRead` error and aborts the run.

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vstar_common::{Column, ColumnType, NullTokens, Value};

use crate::error::{EtlError, Result};
use crate::record::RecordSet;

/// Supplies the raw flat dataset as one ordered, uniformly-shaped record set
pub trait RecordSource {
    /// Short label used in logs and the bronze `_source_file` column
    fn name(&self) -> String;

    /// Read every record into memory
    fn read_all(&mut self) -> Result<RecordSet>;
}

impl RecordSource for RecordSet {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn read_all(&mut self) -> Result<RecordSet> {
        Ok(self.clone())
    }
}

/// Headered CSV file source.
///
/// Column types are inferred over the whole file: a column is `integer` if
/// every present field parses as i64, `float` if every present field parses
/// as f64, and `text` otherwise. Empty fields and the null tokens (pandas'
/// missing-value spellings unless overridden, `None` included) are null and
/// take no part in inference.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
    null_tokens: NullTokens,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            null_tokens: NullTokens::default(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_null_tokens(mut self, null_tokens: NullTokens) -> Self {
        self.null_tokens = null_tokens;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_err(&self, reason: impl std::fmt::Display) -> EtlError {
        EtlError::SourceRead(format!("{}: {}", self.path.display(), reason))
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn read_all(&mut self) -> Result<RecordSet> {
        info!(path = %self.path.display(), "Reading CSV source");

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_path(&self.path)
            .map_err(|e| self.read_err(e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| self.read_err(e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() {
            return Err(self.read_err("file has no header row"));
        }

        let raw_rows = reader
            .records()
            .collect::<std::result::Result<Vec<csv::StringRecord>, _>>()
            .map_err(|e| self.read_err(e))?;

        let columns: Vec<Column> = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let ty = infer_column_type(
                    raw_rows.iter().filter_map(|row| row.get(idx)),
                    &self.null_tokens,
                );
                Column::new(name, ty)
            })
            .collect();

        debug!(
            columns = ?columns.iter().map(|c| format!("{}:{}", c.name, c.ty)).collect::<Vec<_>>(),
            "Inferred column types"
        );

        let mut records = RecordSet::new(columns.clone()).map_err(|e| self.read_err(e))?;
        for raw in &raw_rows {
            let row = raw
                .iter()
                .zip(&columns)
                .map(|(field, column)| Value::parse_with_nulls(field, column.ty, &self.null_tokens))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| self.read_err(e))?;
            records.push(row)?;
        }

        info!(
            path = %self.path.display(),
            records = records.len(),
            columns = records.columns().len(),
            "CSV source loaded"
        );

        Ok(records)
    }
}

/// Narrowest type that accepts every non-null field; all-null columns are text
pub fn infer_column_type<'a>(
    fields: impl Iterator<Item = &'a str>,
    nulls: &NullTokens,
) -> ColumnType {
    let mut ty = None;
    for field in fields.map(str::trim).filter(|f| !nulls.is_null(f)) {
        let mut candidate = ty.unwrap_or(ColumnType::Integer);
        while !candidate.accepts(field) {
            candidate = match candidate {
                ColumnType::Integer => ColumnType::Float,
                ColumnType::Float | ColumnType::Text => ColumnType::Text,
            };
        }
        ty = Some(candidate);
    }
    ty.unwrap_or(ColumnType::Text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_infer_column_type() {
        let nulls = NullTokens::default();
        assert_eq!(infer_column_type(["1", "", "3"].into_iter(), &nulls), ColumnType::Integer);
        assert_eq!(infer_column_type(["1", "2.5"].into_iter(), &nulls), ColumnType::Float);
        assert_eq!(infer_column_type(["1.5", "n/a"].into_iter(), &nulls), ColumnType::Float);
        assert_eq!(infer_column_type(["1.5", "abc"].into_iter(), &nulls), ColumnType::Text);
        assert_eq!(infer_column_type(["", " ", "NA"].into_iter(), &nulls), ColumnType::Text);

        let empty_only = NullTokens::empty_only();
        assert_eq!(infer_column_type(["1.5", "n/a"].into_iter(), &empty_only), ColumnType::Text);
    }

    #[test]
    fn test_missing_value_tokens_keep_numeric_columns() {
        let file = write_csv(
            "price,mileage,accident_history
             NA,10,None
             20000,NaN,Minor
             35000.5,null,N/A
",
        );

        let records = CsvSource::new(file.path()).read_all().unwrap();

        assert_eq!(records.column("price").unwrap().ty, ColumnType::Float);
        assert_eq!(records.column("mileage").unwrap().ty, ColumnType::Integer);

        let first = records.get(0).unwrap();
        assert_eq!(first.get("price"), Some(&Value::Null));
        assert_eq!(first.get("accident_history"), Some(&Value::Null));

        let second = records.get(1).unwrap();
        assert_eq!(second.get("price"), Some(&Value::Float(20000.0)));
        assert_eq!(second.get("mileage"), Some(&Value::Null));
        assert_eq!(second.get("accident_history"), Some(&Value::from("Minor")));
    }

    #[test]
    fn test_null_tokens_can_be_narrowed() {
        let file = write_csv("price,accident_history
20000,None
,Minor
");

        let records = CsvSource::new(file.path())
            .with_null_tokens(NullTokens::empty_only())
            .read_all()
            .unwrap();

        assert_eq!(records.get(0).unwrap().get("accident_history"), Some(&Value::from("None")));
        assert_eq!(records.get(1).unwrap().get("price"), Some(&Value::Null));
    }

    #[test]
    fn test_reads_typed_records_with_nulls() {
        let file = write_csv(
            "make,model,year,price,accident_history\n\
             Toyota,Corolla,2020,20000,\n\
             Honda,Civic,2019,18000.5,Minor\n",
        );

        let records = CsvSource::new(file.path()).read_all().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records.column("year").unwrap().ty, ColumnType::Integer);
        assert_eq!(records.column("price").unwrap().ty, ColumnType::Float);
        assert_eq!(records.column("accident_history").unwrap().ty, ColumnType::Text);

        let first = records.get(0).unwrap();
        assert_eq!(first.get("price"), Some(&Value::Float(20000.0)));
        assert_eq!(first.get("accident_history"), Some(&Value::Null));
    }

    #[test]
    fn test_ragged_file_is_a_source_failure() {
        let file = write_csv("make,model\nToyota,Corolla,extra\n");
        let err = CsvSource::new(file.path()).read_all().unwrap_err();
        assert!(matches!(err, EtlError::SourceRead(_)));
    }

    #[test]
    fn test_missing_file_is_a_source_failure() {
        let err = CsvSource::new("/nonexistent/vehicles.csv").read_all().unwrap_err();
        assert!(matches!(err, EtlError::SourceRead(_)));
    }

    #[test]
    fn test_duplicate_header_is_a_source_failure() {
        let file = write_csv("make,make\nToyota,Toyota\n");
        assert!(CsvSource::new(file.path()).read_all().is_err());
    }
}
