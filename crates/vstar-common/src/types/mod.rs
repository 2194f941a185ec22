//! Scalar and schema types shared across VStar

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

// ============================================================================
// Column Schema
// ============================================================================

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Float,
    /// UTF-8 text
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
        }
    }

    /// Postgres type used when the column is materialised
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
        }
    }

    /// Whether a raw, non-empty field can be read as this type
    pub fn accepts(&self, raw: &str) -> bool {
        match self {
            ColumnType::Integer => raw.trim().parse::<i64>().is_ok(),
            ColumnType::Float => raw.trim().parse::<f64>().is_ok(),
            ColumnType::Text => true,
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "integer" | "int" | "bigint" => Ok(ColumnType::Integer),
            "float" | "double" | "real" => Ok(ColumnType::Float),
            "text" | "string" | "varchar" => Ok(ColumnType::Text),
            _ => Err(CommonError::InvalidColumnType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

// ============================================================================
// Missing Values
// ============================================================================

/// Raw spellings read as missing, the same set pandas uses by default.
pub const DEFAULT_NULL_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Field values treated as null, compared after trimming.
///
/// An empty field is always null, whatever the set holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NullTokens(BTreeSet<String>);

impl NullTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Only empty fields are null
    pub fn empty_only() -> Self {
        Self(BTreeSet::new())
    }

    pub fn is_null(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty() || self.0.contains(trimmed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for NullTokens {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_TOKENS)
    }
}

// ============================================================================
// Scalar Values
// ============================================================================

/// A single scalar cell.
///
/// Equality is total so values can key hash maps:
///
/// - `Null == Null`, and a present value never equals `Null`
/// - floats compare by bit pattern after folding `-0.0` into `0.0` and every
///   NaN into one canonical NaN
/// - values of different variants are never equal (`Int(1) != Float(1.0)`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Read a raw field as the given column type.
    ///
    /// Empty fields and [`DEFAULT_NULL_TOKENS`] are `Null`, as is a float
    /// that parses to NaN.
    pub fn parse_as(raw: &str, ty: ColumnType) -> Result<Self> {
        Self::parse_field(raw, ty, |t| DEFAULT_NULL_TOKENS.contains(&t))
    }

    /// [`Value::parse_as`] with a caller-chosen null set
    pub fn parse_with_nulls(raw: &str, ty: ColumnType, nulls: &NullTokens) -> Result<Self> {
        Self::parse_field(raw, ty, |t| nulls.is_null(t))
    }

    fn parse_field(raw: &str, ty: ColumnType, is_null: impl Fn(&str) -> bool) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_null(trimmed) {
            return Ok(Value::Null);
        }

        let invalid = || CommonError::InvalidValue {
            raw: raw.to_string(),
            expected: ty.to_string(),
        };

        match ty {
            ColumnType::Integer => trimmed.parse().map(Value::Int).map_err(|_| invalid()),
            ColumnType::Float => match trimmed.parse::<f64>() {
                Ok(v) if v.is_nan() => Ok(Value::Null),
                Ok(v) => Ok(Value::Float(v)),
                Err(_) => Err(invalid()),
            },
            ColumnType::Text => Ok(Value::Text(raw.to_string())),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    fn float_bits(v: f64) -> u64 {
        if v.is_nan() {
            f64::NAN.to_bits()
        } else if v == 0.0 {
            0.0f64.to_bits()
        } else {
            v.to_bits()
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => Self::float_bits(*a) == Self::float_bits(*b),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {},
            Value::Int(v) => v.hash(state),
            Value::Float(v) => Self::float_bits(*v).hash(state),
            Value::Text(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_null_equality() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Text(String::new()));
        assert_ne!(Value::Null, Value::Int(0));
        assert_ne!(Value::Null, Value::Float(0.0));
    }

    #[test]
    fn test_cross_variant_inequality() {
        assert_ne!(Value::Int(2020), Value::Float(2020.0));
        assert_ne!(Value::Int(1), Value::Text("1".to_string()));
    }

    #[test]
    fn test_float_normalisation() {
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(hash_of(&Value::Float(0.0)), hash_of(&Value::Float(-0.0)));
        assert_eq!(Value::Float(f64::NAN), Value::Float(-f64::NAN));
    }

    #[test]
    fn test_parse_as() {
        assert_eq!(Value::parse_as(" 42 ", ColumnType::Integer).unwrap(), Value::Int(42));
        assert_eq!(Value::parse_as("1.5", ColumnType::Float).unwrap(), Value::Float(1.5));
        assert_eq!(
            Value::parse_as("Toyota", ColumnType::Text).unwrap(),
            Value::Text("Toyota".to_string())
        );
        assert!(Value::parse_as("  ", ColumnType::Text).unwrap().is_null());
        assert!(Value::parse_as("abc", ColumnType::Integer).is_err());
    }

    #[test]
    fn test_missing_value_spellings_are_null() {
        for raw in ["NA", "N/A", "NaN", "nan", "NULL", "null", "None", " <NA> "] {
            assert!(Value::parse_as(raw, ColumnType::Float).unwrap().is_null(), "{raw}");
            assert!(Value::parse_as(raw, ColumnType::Text).unwrap().is_null(), "{raw}");
        }
        // Spellings outside the set that still parse to NaN
        assert!(Value::parse_as("NAN", ColumnType::Float).unwrap().is_null());
    }

    #[test]
    fn test_custom_null_tokens() {
        let nulls = NullTokens::new(["-", "missing"]);
        assert!(nulls.is_null(" - "));
        assert!(nulls.is_null(""));
        assert!(!nulls.is_null("None"));

        assert_eq!(
            Value::parse_with_nulls("None", ColumnType::Text, &nulls).unwrap(),
            Value::Text("None".to_string())
        );
        assert!(Value::parse_with_nulls("missing", ColumnType::Integer, &nulls)
            .unwrap()
            .is_null());

        let empty_only = NullTokens::empty_only();
        assert!(Value::parse_with_nulls("NA", ColumnType::Integer, &empty_only).is_err());
        assert!(Value::parse_with_nulls("  ", ColumnType::Integer, &empty_only)
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_column_type_from_str() {
        assert_eq!("INTEGER".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert_eq!("double".parse::<ColumnType>().unwrap(), ColumnType::Float);
        assert_eq!("varchar".parse::<ColumnType>().unwrap(), ColumnType::Text);
        assert!("blob".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("Civic")), Value::Text("Civic".to_string()));
    }

    fn any_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            "[a-zA-Z ]{0,8}".prop_map(Value::Text),
        ]
    }

    proptest! {
        #[test]
        fn prop_equal_values_hash_equally(a in any_value(), b in any_value()) {
            if a == b {
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }
        }

        #[test]
        fn prop_equality_is_reflexive(a in any_value()) {
            prop_assert_eq!(a.clone(), a);
        }
    }
}
