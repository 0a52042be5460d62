//! `ir` defines types for an intermediate representation (IR) of queries.
//!
//! The AST and IR stay separate: the AST mirrors what was written, the IR
//! describes the querying procedure as a chain of relational operators.
//! With only primary-key storage and no secondary indexes, every table
//! access is a scan; the chain on top filters, projects, and windows it.
//!
//! `select * from t where a = 1 offset 2 rows` lowers to:
//!
//! ```text
//! OffsetFetch(offset: 2,
//!     Project([*],
//!         Filter(a = 1,
//!             Scan(t))))
//! ```

use crate::ast;

/// Any of the IR blocks that can be chained together. A block consumes rows
/// from its input (if it has one) and emits rows to its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    ConstantRows(ConstantRows),
    Scan(Scan),
    Filter(Filter),
    Project(Project),
    OffsetFetch(OffsetFetch),
}

/// A leaf producing literal rows: a VALUES constructor, or the single empty
/// row a FROM-less SELECT evaluates against.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantRows {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<ast::Expr>>,
}

/// One pass over all the rows of a stored (or virtual) table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub table_name: String,
}

/// Drops rows whose predicate does not evaluate to true.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub predicate: ast::Expr,
    pub input: Box<Block>,
}

/// Computes the output columns, including the aggregate forms.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub items: Vec<ast::SelItem>,
    pub input: Box<Block>,
}

/// OFFSET/FETCH windowing over the input rows.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetFetch {
    pub offset: u64,
    pub fetch: Option<u64>,
    pub input: Box<Block>,
}
