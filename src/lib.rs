//! solodb is an embeddable SQL database engine that persists tables to a
//! single file, or runs purely in memory.
//!
//! The storage core is a paged B-tree over byte-string keys with
//! multiversion (tid/xid-stamped) records and a single-writer transaction
//! coordinator; on top of it sit a pest-based SQL parser, a small relational
//! IR, and the `Connection` host API.
//!
//! System layers, leaves first:
//! - `dbheader` / `pager`: the file format header and page-addressed I/O.
//! - `record` / `page`: serialized PageObjects and page-level mutation.
//! - `btree`: ordering pages into a search/range-scan tree.
//! - `schema` / `typed_row` / `storage` / `transaction`: tables, rows,
//!   MVCC visibility, and the transaction state machine.
//! - `parser` / `pt_to_ast` / `ast` / `ast_to_ir` / `ir` / `ir_interpreter`
//!   / `eval` / `functions`: the SQL surface.
//! - `connection`: open/prepare/query, locks, and the query cache.
//!
//! ```
//! let conn = solodb::open(":memory:", solodb::OpenOptions::default()).unwrap();
//! conn.query("CREATE TABLE t (a INT)").unwrap();
//! conn.query("INSERT INTO t (a) VALUES (1)").unwrap();
//! let result = conn.query("SELECT a FROM t").unwrap();
//! assert_eq!(result.rows.len(), 1);
//! ```

pub mod ast;
pub mod ast_to_ir;
pub mod btree;
pub mod connection;
pub mod dbheader;
pub mod error;
pub mod eval;
pub mod formatting;
pub mod functions;
pub mod ir;
pub mod ir_interpreter;
pub mod page;
pub mod pager;
pub mod parser;
pub mod pt_to_ast;
pub mod record;
pub mod schema;
pub mod sql_type;
pub mod sql_value;
pub mod storage;
pub mod temp_table;
pub mod transaction;
pub mod typed_row;

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub use connection::{Connection, OpenOptions, PreparedStatement, VirtualTableProvider};
pub use error::{Error, Result};
pub use functions::ScalarFn;
pub use sql_type::SqlType;
pub use sql_value::{Datum, SqlValue};
pub use storage::MEMORY_PATH;
pub use temp_table::TempTable;

/// Opens a database connection. `":memory:"` selects an in-memory database;
/// any other path names a database file, created if absent.
pub fn open(path: &str, options: OpenOptions) -> Result<Connection> {
    Connection::open(path, options)
}
