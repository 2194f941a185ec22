//! Silver enrichment of raw vehicle records
//!
//! Adds derived categorical and scoring columns before dimensions are built.
//! Every derived value depends only on its own record and the reference
//! year, so enrichment never changes row count or order.

use vstar_common::{Column, ColumnType, Value};

use crate::error::Result;
use crate::record::RecordSet;

pub const ACCIDENT_HISTORY: &str = "accident_history";
pub const PRICE_CATEGORY: &str = "price_category";
pub const AGE_CATEGORY: &str = "age_category";
pub const MILEAGE_CATEGORY: &str = "mileage_category";
pub const CONDITION_SCORE: &str = "condition_score";
pub const QUALITY_SCORE: &str = "quality_score";

const UNKNOWN: &str = "Unknown";
const DEFAULT_CONDITION_SCORE: i64 = 3;

/// Enrich a record set in place of the raw one.
pub fn enrich(mut records: RecordSet, reference_year: i32) -> Result<RecordSet> {
    let numeric = |records: &RecordSet, column: &str| -> Vec<Option<f64>> {
        records
            .records()
            .map(|r| r.get(column).and_then(Value::as_f64))
            .collect()
    };
    let text = |records: &RecordSet, column: &str| -> Vec<Option<String>> {
        records
            .records()
            .map(|r| r.get(column).and_then(Value::as_str).map(str::to_string))
            .collect()
    };

    let accident: Vec<String> = text(&records, ACCIDENT_HISTORY)
        .into_iter()
        .map(|v| v.unwrap_or_else(|| UNKNOWN.to_string()))
        .collect();
    let condition = text(&records, "condition");
    let price = numeric(&records, "price");
    let year = numeric(&records, "year");
    let mileage = numeric(&records, "mileage");
    let owners = numeric(&records, "owner_count");

    let categories = |values: &[Option<f64>], f: fn(Option<f64>) -> &'static str| -> Vec<Value> {
        values.iter().map(|v| Value::from(f(*v))).collect()
    };

    let price_categories = categories(&price, price_category);
    let mileage_categories = categories(&mileage, mileage_category);
    let age_categories: Vec<Value> = year
        .iter()
        .map(|y| Value::from(age_category(*y, reference_year)))
        .collect();
    let condition_scores: Vec<Value> = condition
        .iter()
        .map(|c| Value::Int(condition_score(c.as_deref())))
        .collect();
    let quality_scores: Vec<Value> = (0..records.len())
        .map(|i| {
            Value::Float(quality_score(
                &accident[i],
                condition[i].as_deref(),
                owners[i],
                mileage[i],
            ))
        })
        .collect();

    // Only fill accident_history when the input has it
    if let Some(column) = records.column(ACCIDENT_HISTORY).cloned() {
        if column.ty == ColumnType::Text {
            records.set_column(column, accident.into_iter().map(Value::Text).collect())?;
        }
    }

    records.set_column(Column::new(PRICE_CATEGORY, ColumnType::Text), price_categories)?;
    records.set_column(Column::new(AGE_CATEGORY, ColumnType::Text), age_categories)?;
    records.set_column(Column::new(MILEAGE_CATEGORY, ColumnType::Text), mileage_categories)?;
    records.set_column(Column::new(CONDITION_SCORE, ColumnType::Integer), condition_scores)?;
    records.set_column(Column::new(QUALITY_SCORE, ColumnType::Float), quality_scores)?;

    Ok(records)
}

/// NaN counts as missing, like an absent value
fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan())
}

pub fn price_category(price: Option<f64>) -> &'static str {
    match present(price) {
        None => UNKNOWN,
        Some(p) if p < 15_000.0 => "Budget",
        Some(p) if p < 30_000.0 => "Economy",
        Some(p) if p < 50_000.0 => "Mid-Range",
        Some(p) if p < 80_000.0 => "Premium",
        Some(_) => "Luxury",
    }
}

pub fn age_category(year: Option<f64>, reference_year: i32) -> &'static str {
    match present(year).map(|y| f64::from(reference_year) - y) {
        None => UNKNOWN,
        Some(age) if age <= 3.0 => "New",
        Some(age) if age <= 7.0 => "Recent",
        Some(age) if age <= 15.0 => "Used",
        Some(_) => "Old",
    }
}

pub fn mileage_category(mileage: Option<f64>) -> &'static str {
    match present(mileage) {
        None => UNKNOWN,
        Some(m) if m < 30_000.0 => "Low",
        Some(m) if m < 80_000.0 => "Medium",
        Some(m) if m < 150_000.0 => "High",
        Some(_) => "Very High",
    }
}

pub fn condition_score(condition: Option<&str>) -> i64 {
    match condition {
        Some("Excellent") => 5,
        Some("Very Good") => 4,
        Some("Good") => 3,
        Some("Fair") => 2,
        Some("Poor") => 1,
        _ => DEFAULT_CONDITION_SCORE,
    }
}

/// 0-100 score; deductions stack
pub fn quality_score(
    accident_history: &str,
    condition: Option<&str>,
    owner_count: Option<f64>,
    mileage: Option<f64>,
) -> f64 {
    let mut score = 100.0;

    score -= match accident_history {
        UNKNOWN => 10.0,
        "Major" => 20.0,
        "Minor" => 5.0,
        _ => 0.0,
    };
    score -= match condition {
        Some("Poor") => 15.0,
        Some("Fair") => 10.0,
        _ => 0.0,
    };
    if present(owner_count).is_some_and(|n| n > 3.0) {
        score -= 5.0;
    }
    if present(mileage).is_some_and(|m| m > 150_000.0) {
        score -= 10.0;
    }

    score
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_price_category_bounds() {
        assert_eq!(price_category(None), "Unknown");
        assert_eq!(price_category(Some(14_999.99)), "Budget");
        assert_eq!(price_category(Some(15_000.0)), "Economy");
        assert_eq!(price_category(Some(49_999.0)), "Mid-Range");
        assert_eq!(price_category(Some(50_000.0)), "Premium");
        assert_eq!(price_category(Some(80_000.0)), "Luxury");
    }

    #[test]
    fn test_age_category_uses_reference_year() {
        assert_eq!(age_category(Some(2022.0), 2025), "New");
        assert_eq!(age_category(Some(2018.0), 2025), "Recent");
        assert_eq!(age_category(Some(2010.0), 2025), "Used");
        assert_eq!(age_category(Some(2009.0), 2025), "Old");
        assert_eq!(age_category(None, 2025), "Unknown");
    }

    #[test]
    fn test_mileage_and_condition() {
        assert_eq!(mileage_category(Some(29_999.0)), "Low");
        assert_eq!(mileage_category(Some(150_000.0)), "Very High");
        assert_eq!(condition_score(Some("Very Good")), 4);
        assert_eq!(condition_score(Some("Salvage")), 3);
        assert_eq!(condition_score(None), 3);
    }

    #[test]
    fn test_quality_score_deductions_stack() {
        assert_eq!(quality_score("None", Some("Good"), Some(1.0), Some(10_000.0)), 100.0);
        assert_eq!(
            quality_score("Major", Some("Poor"), Some(4.0), Some(200_000.0)),
            50.0
        );
        assert_eq!(quality_score("Unknown", None, None, None), 90.0);
    }

    #[test]
    fn test_enrich_appends_columns_and_fills_accidents() {
        let records = RecordSet::from_rows(
            vec![
                Column::new("year", ColumnType::Integer),
                Column::new("mileage", ColumnType::Integer),
                Column::new("price", ColumnType::Float),
                Column::new("condition", ColumnType::Text),
                Column::new("accident_history", ColumnType::Text),
            ],
            vec![
                vec![
                    Value::Int(2021),
                    Value::Int(20_000),
                    Value::Float(21_000.0),
                    Value::from("Excellent"),
                    Value::Null,
                ],
                vec![Value::Null, Value::Null, Value::Null, Value::Null, Value::from("Minor")],
            ],
        )
        .unwrap();

        let enriched = enrich(records, 2024).unwrap();
        assert_eq!(enriched.len(), 2);

        let first = enriched.get(0).unwrap();
        assert_eq!(first.get(ACCIDENT_HISTORY), Some(&Value::from("Unknown")));
        assert_eq!(first.get(PRICE_CATEGORY), Some(&Value::from("Economy")));
        assert_eq!(first.get(AGE_CATEGORY), Some(&Value::from("New")));
        assert_eq!(first.get(MILEAGE_CATEGORY), Some(&Value::from("Low")));
        assert_eq!(first.get(CONDITION_SCORE), Some(&Value::Int(5)));
        assert_eq!(first.get(QUALITY_SCORE), Some(&Value::Float(90.0)));

        let second = enriched.get(1).unwrap();
        assert_eq!(second.get(PRICE_CATEGORY), Some(&Value::from("Unknown")));
        assert_eq!(second.get(CONDITION_SCORE), Some(&Value::Int(3)));
        assert_eq!(second.get(QUALITY_SCORE), Some(&Value::Float(95.0)));
    }

    #[test]
    fn test_nan_is_treated_as_missing() {
        assert_eq!(price_category(Some(f64::NAN)), "Unknown");
        assert_eq!(mileage_category(Some(f64::NAN)), "Unknown");
        assert_eq!(age_category(Some(f64::NAN), 2025), "Unknown");
        assert_eq!(
            quality_score("None", Some("Good"), Some(f64::NAN), Some(f64::NAN)),
            100.0
        );
    }

    #[test]
    fn test_csv_missing_value_spellings_enrich_as_unknown() {
        use crate::source::{CsvSource, RecordSource};
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"price,mileage,accident_history\n\
              NaN,10,None\n\
              NA,20,Minor\n\
              20000,30,Major\n",
        )
        .unwrap();

        let records = CsvSource::new(file.path()).read_all().unwrap();
        assert_eq!(records.column("price").unwrap().ty, ColumnType::Float);

        let enriched = enrich(records, 2025).unwrap();
        let categories: Vec<_> = enriched
            .records()
            .map(|r| r.get(PRICE_CATEGORY).cloned().unwrap())
            .collect();
        assert_eq!(
            categories,
            vec![Value::from("Unknown"), Value::from("Unknown"), Value::from("Economy")]
        );

        // "None" reads as missing, so it is filled and scored as unknown history
        let first = enriched.get(0).unwrap();
        assert_eq!(first.get(ACCIDENT_HISTORY), Some(&Value::from("Unknown")));
        assert_eq!(first.get(QUALITY_SCORE), Some(&Value::Float(90.0)));
    }
}
