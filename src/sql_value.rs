//! Defines the runtime value type: a declared SQL type plus a payload.
//!
//! Numbers are carried as 64-bit floats regardless of the declared numeric
//! type, strings as byte sequences, booleans as themselves. NULL is
//! representable in any declared type, so nullability is part of the payload
//! (`Datum::Null`) rather than a distinct type.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::sql_type::SqlType;

#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Num(f64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct SqlValue {
    pub sql_type: SqlType,
    pub datum: Datum,
}

/// Equality is by payload; the declared type is metadata. `1` stored in an
/// INTEGER column equals `1` stored in a BIGINT column.
impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.datum == other.datum
    }
}

impl SqlValue {
    pub fn null(sql_type: SqlType) -> SqlValue {
        SqlValue { sql_type, datum: Datum::Null }
    }

    pub fn int(i: i64) -> SqlValue {
        SqlValue { sql_type: SqlType::Int, datum: Datum::Num(i as f64) }
    }

    pub fn bigint(i: i64) -> SqlValue {
        SqlValue { sql_type: SqlType::BigInt, datum: Datum::Num(i as f64) }
    }

    pub fn double(x: f64) -> SqlValue {
        SqlValue { sql_type: SqlType::Double, datum: Datum::Num(x) }
    }

    pub fn bool(b: bool) -> SqlValue {
        SqlValue { sql_type: SqlType::Boolean, datum: Datum::Bool(b) }
    }

    pub fn text(s: impl Into<String>) -> SqlValue {
        let s = s.into();
        let n = s.len().min(u16::MAX as usize) as u16;
        SqlValue { sql_type: SqlType::Varchar(n.max(1)), datum: Datum::Text(s) }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.datum, Datum::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.datum {
            Datum::Num(x) => Some(*x),
            Datum::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.datum {
            Datum::Num(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.datum {
            Datum::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness for WHERE predicates: booleans as themselves, numbers by
    /// non-zero, NULL and text as false.
    pub fn is_true(&self) -> bool {
        match &self.datum {
            Datum::Bool(b) => *b,
            Datum::Num(x) => *x != 0.0,
            _ => false,
        }
    }

    /// Rebinds this value to a column's declared type, rejecting payloads
    /// the type cannot carry. NULL coerces to anything.
    pub fn coerce(self, target: SqlType) -> Result<SqlValue> {
        let ok = match &self.datum {
            Datum::Null => true,
            Datum::Bool(_) => target == SqlType::Boolean,
            Datum::Num(_) => target.is_numeric(),
            Datum::Text(_) => target.is_text(),
        };
        if !ok {
            return Err(Error::Syntax(format!(
                "cannot store {} value in {} column",
                self.type_name(),
                target
            )));
        }
        Ok(SqlValue { sql_type: target, datum: self.datum })
    }

    fn type_name(&self) -> &'static str {
        match self.datum {
            Datum::Null => "NULL",
            Datum::Bool(_) => "BOOLEAN",
            Datum::Num(_) => "numeric",
            Datum::Text(_) => "character",
        }
    }

    /// SQL ordering between two payloads; NULL and mismatched payload kinds
    /// do not compare.
    pub fn compare(&self, other: &SqlValue) -> Option<Ordering> {
        match (&self.datum, &other.datum) {
            (Datum::Num(a), Datum::Num(b)) => a.partial_cmp(b),
            (Datum::Text(a), Datum::Text(b)) => Some(a.cmp(b)),
            (Datum::Bool(a), Datum::Bool(b)) => Some(a.cmp(b)),
            (Datum::Num(_), Datum::Bool(_)) | (Datum::Bool(_), Datum::Num(_)) => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.datum {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(true) => write!(f, "TRUE"),
            Datum::Bool(false) => write!(f, "FALSE"),
            Datum::Num(x) => write!(f, "{}", x),
            Datum::Text(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(SqlValue::int(42).to_string(), "42");
        assert_eq!(SqlValue::double(3.5).to_string(), "3.5");
        assert_eq!(SqlValue::bool(true).to_string(), "TRUE");
        assert_eq!(SqlValue::text("hi").to_string(), "hi");
        assert_eq!(SqlValue::null(SqlType::Int).to_string(), "NULL");
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            SqlValue::int(1).coerce(SqlType::SmallInt).unwrap().sql_type,
            SqlType::SmallInt
        );
        assert_eq!(
            SqlValue::null(SqlType::Int).coerce(SqlType::Varchar(5)).unwrap().sql_type,
            SqlType::Varchar(5)
        );
        assert!(SqlValue::text("x").coerce(SqlType::Int).is_err());
        assert!(SqlValue::int(1).coerce(SqlType::Varchar(5)).is_err());
        assert!(SqlValue::bool(true).coerce(SqlType::Int).is_err());
    }

    #[test]
    fn test_compare() {
        use std::cmp::Ordering::*;
        assert_eq!(SqlValue::int(1).compare(&SqlValue::double(2.0)), Some(Less));
        assert_eq!(SqlValue::text("a").compare(&SqlValue::text("a")), Some(Equal));
        assert_eq!(SqlValue::null(SqlType::Int).compare(&SqlValue::int(1)), None);
        assert_eq!(SqlValue::text("a").compare(&SqlValue::int(1)), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(SqlValue::bool(true).is_true());
        assert!(SqlValue::int(2).is_true());
        assert!(!SqlValue::int(0).is_true());
        assert!(!SqlValue::null(SqlType::Boolean).is_true());
    }
}
