//! Defines an enum of the declared SQL column types and routines for
//! conversion to and from their SQL spellings.

use std::str::FromStr;

/// The SQL:2016 scalar types this engine stores. Parameterized types carry
/// their declared length/precision; `DOUBLE PRECISION` is spelled with the
/// space on output, as the standard writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Float(u8),
    Char(u16),
    Varchar(u16),
}

impl SqlType {
    pub fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Int | SqlType::BigInt)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer()
            || matches!(self, SqlType::Real | SqlType::Double | SqlType::Float(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, SqlType::Char(_) | SqlType::Varchar(_))
    }

    /// Stable one-byte code plus parameter for the row codec.
    pub fn to_code(self) -> (u8, u32) {
        match self {
            SqlType::Boolean => (1, 0),
            SqlType::SmallInt => (2, 0),
            SqlType::Int => (3, 0),
            SqlType::BigInt => (4, 0),
            SqlType::Real => (5, 0),
            SqlType::Double => (6, 0),
            SqlType::Float(p) => (7, p as u32),
            SqlType::Char(n) => (8, n as u32),
            SqlType::Varchar(n) => (9, n as u32),
        }
    }

    pub fn from_code(code: u8, param: u32) -> Option<SqlType> {
        match code {
            1 => Some(SqlType::Boolean),
            2 => Some(SqlType::SmallInt),
            3 => Some(SqlType::Int),
            4 => Some(SqlType::BigInt),
            5 => Some(SqlType::Real),
            6 => Some(SqlType::Double),
            7 => Some(SqlType::Float(param as u8)),
            8 => Some(SqlType::Char(param as u16)),
            9 => Some(SqlType::Varchar(param as u16)),
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Int => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Real => write!(f, "REAL"),
            SqlType::Double => write!(f, "DOUBLE PRECISION"),
            SqlType::Float(p) => write!(f, "FLOAT({})", p),
            SqlType::Char(n) => write!(f, "CHARACTER({})", n),
            SqlType::Varchar(n) => write!(f, "VARCHAR({})", n),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSqlTypeError;

impl FromStr for SqlType {
    type Err = ParseSqlTypeError;

    /// Accepts the SQL spellings case-insensitively, with or without inner
    /// whitespace: `int`, `INTEGER`, `double precision`, `VARCHAR(10)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s.to_uppercase().chars().filter(|c| !c.is_whitespace()).collect();
        let (name, param) = match folded.find('(') {
            None => (folded.as_str(), None),
            Some(open) => {
                let close = folded.rfind(')').ok_or(ParseSqlTypeError)?;
                if close < open {
                    return Err(ParseSqlTypeError);
                }
                let param: u32 =
                    folded[open + 1..close].parse().map_err(|_| ParseSqlTypeError)?;
                (&folded[..open], Some(param))
            }
        };
        match (name, param) {
            ("BOOLEAN", None) => Ok(SqlType::Boolean),
            ("SMALLINT", None) => Ok(SqlType::SmallInt),
            ("INT" | "INTEGER", None) => Ok(SqlType::Int),
            ("BIGINT", None) => Ok(SqlType::BigInt),
            ("REAL", None) => Ok(SqlType::Real),
            ("DOUBLE" | "DOUBLEPRECISION", None) => Ok(SqlType::Double),
            ("FLOAT", p) => Ok(SqlType::Float(p.unwrap_or(53) as u8)),
            ("CHAR" | "CHARACTER", p) => Ok(SqlType::Char(p.unwrap_or(1) as u16)),
            ("VARCHAR", Some(n)) => Ok(SqlType::Varchar(n as u16)),
            _ => Err(ParseSqlTypeError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spellings() {
        assert_eq!(SqlType::from_str("int").unwrap(), SqlType::Int);
        assert_eq!(SqlType::from_str("INTEGER").unwrap(), SqlType::Int);
        assert_eq!(SqlType::from_str("double precision").unwrap(), SqlType::Double);
        assert_eq!(SqlType::from_str("FLOAT(24)").unwrap(), SqlType::Float(24));
        assert_eq!(SqlType::from_str("CHARACTER (3)").unwrap(), SqlType::Char(3));
        assert_eq!(SqlType::from_str("varchar(10)").unwrap(), SqlType::Varchar(10));
        assert_eq!(SqlType::from_str("blob"), Err(ParseSqlTypeError));
        assert_eq!(SqlType::from_str("VARCHAR"), Err(ParseSqlTypeError));
    }

    #[test]
    fn test_display_round_trip() {
        for t in [
            SqlType::Boolean,
            SqlType::SmallInt,
            SqlType::Int,
            SqlType::BigInt,
            SqlType::Real,
            SqlType::Double,
            SqlType::Float(24),
            SqlType::Char(3),
            SqlType::Varchar(10),
        ] {
            assert_eq!(SqlType::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn test_code_round_trip() {
        for t in [SqlType::Boolean, SqlType::BigInt, SqlType::Varchar(40), SqlType::Float(7)] {
            let (code, param) = t.to_code();
            assert_eq!(SqlType::from_code(code, param), Some(t));
        }
        assert_eq!(SqlType::from_code(99, 0), None);
    }
}
