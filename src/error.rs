//! Defines the crate-wide error type.
//!
//! Every error that can cross the statement boundary carries a five-character
//! SQLSTATE identifier in addition to its message, so hosts can dispatch on
//! the class of failure (retry on `40001`, report syntax on `42601`, and so
//! on) without parsing message text. Layer-local errors (`dbheader`, `pager`)
//! convert into this type at the storage boundary.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("relation \"{0}\" does not exist")]
    UndefinedTable(String),
    #[error("relation \"{0}\" already exists")]
    DuplicateTable(String),
    #[error("column \"{0}\" does not exist")]
    UndefinedColumn(String),
    #[error("null value in column \"{0}\" violates not-null constraint")]
    NotNullViolation(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("function \"{0}\" does not exist")]
    UndefinedFunction(String),
    #[error("could not serialize access due to concurrent update")]
    SerializationFailure,
    #[error("there is already a transaction in progress")]
    ActiveSqlTransaction,
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    InFailedSqlTransaction,
    #[error("there is no transaction in progress")]
    InvalidTransactionTermination,
    #[error("error accessing database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("error in database header: {0}")]
    DbHdr(#[from] crate::dbheader::Error),
    #[error("error in pager: {0}")]
    Pager(#[from] crate::pager::Error),
    #[error("database file is corrupt: {0}")]
    Corrupt(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The SQLSTATE identifier for this error, per ISO/IEC 9075-2 Annex A
    /// where one exists and the implementation-defined `XX` class otherwise.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            Error::Syntax(_) => "42601",
            Error::UndefinedTable(_) => "42P01",
            Error::DuplicateTable(_) => "42P07",
            Error::UndefinedColumn(_) => "42703",
            Error::NotNullViolation(_) => "23502",
            Error::DivisionByZero => "22012",
            Error::UndefinedFunction(_) => "42883",
            Error::SerializationFailure => "40001",
            Error::ActiveSqlTransaction => "25001",
            Error::InFailedSqlTransaction => "25P02",
            Error::InvalidTransactionTermination => "2D000",
            Error::Io(_) | Error::Pager(_) => "58030",
            Error::DbHdr(_) | Error::Corrupt(_) => "XX001",
            Error::Internal(_) => "XX000",
        }
    }

    /// Transaction-state errors are returned without disturbing the current
    /// transaction; every other error inside an active transaction aborts it.
    pub fn is_transaction_state_error(&self) -> bool {
        matches!(
            self,
            Error::ActiveSqlTransaction
                | Error::InFailedSqlTransaction
                | Error::InvalidTransactionTermination
        )
    }
}

#[test]
fn test_sqlstate_codes() {
    assert_eq!(Error::SerializationFailure.sqlstate(), "40001");
    assert_eq!(Error::ActiveSqlTransaction.sqlstate(), "25001");
    assert_eq!(Error::InFailedSqlTransaction.sqlstate(), "25P02");
    assert_eq!(Error::InvalidTransactionTermination.sqlstate(), "2D000");
    assert_eq!(Error::DivisionByZero.sqlstate(), "22012");
    assert_eq!(Error::UndefinedTable(String::from("T")).sqlstate(), "42P01");
}
