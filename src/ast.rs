//! This module defines abstract syntax tree (AST) types for SQL.
//!
//! The AST discards lexical detail (case, position); identifiers arrive
//! here already folded to uppercase by the parse-tree conversion.

use enum_as_inner::EnumAsInner;

use crate::sql_type::SqlType;

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Statement {
    CreateTable(CreateTableStatement),
    DropTable(DropTableStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Select(SelectStatement),
    StartTransaction,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColDef {
    pub colname: String,
    pub coltype: SqlType,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub tablename: String,
    pub coldefs: Vec<ColDef>,
    pub primary_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStatement {
    pub tablename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub tablename: String,
    /// Explicit column list, or None for the table's declared order.
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub tablename: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub tablename: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub items: Vec<SelItem>,
    pub from: Option<TableExpr>,
    pub where_clause: Option<Expr>,
    pub offset: Option<u64>,
    pub fetch: Option<u64>,
}

/// A FROM source: a stored (or virtual) table, a parenthesized derived
/// table, or a VALUES constructor.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum TableExpr {
    Named(String),
    Derived { query: Box<SelectStatement>, alias: Option<String> },
    Values { rows: Vec<Vec<Expr>>, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum SelItem {
    Star,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Real(f64),
    String(String),
    Bool(bool),
    Null,
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(x) => x.fmt(f),
            Constant::Real(x) => x.fmt(f),
            Constant::String(x) => write!(f, "'{}'", x),
            Constant::Bool(true) => "TRUE".fmt(f),
            Constant::Bool(false) => "FALSE".fmt(f),
            Constant::Null => "NULL".fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Expr {
    Constant(Constant),
    Column(String),
    /// A `?` placeholder, 0-indexed left to right.
    Param(usize),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinOp {
        lhs: Box<Expr>,
        op: Op,
        rhs: Box<Expr>,
    },
    /// `star` is the `COUNT(*)` form; `args` is empty then.
    FnCall {
        name: String,
        args: Vec<Expr>,
        star: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Op::*;
        match self {
            Add => "+".fmt(f),
            Subtract => "-".fmt(f),
            Multiply => "*".fmt(f),
            Divide => "/".fmt(f),
            Eq => "=".fmt(f),
            NotEq => "<>".fmt(f),
            Lt => "<".fmt(f),
            LtEq => "<=".fmt(f),
            Gt => ">".fmt(f),
            GtEq => ">=".fmt(f),
            And => "AND".fmt(f),
            Or => "OR".fmt(f),
        }
    }
}

/// The aggregate names the projection operator special-cases. Everything
/// else goes through the scalar function registry.
pub const AGGREGATE_NAMES: [&str; 5] = ["COUNT", "SUM", "MIN", "MAX", "AVG"];

impl Expr {
    /// Whether this expression contains an aggregate call at any depth.
    pub fn has_aggregate(&self) -> bool {
        match self {
            Expr::Constant(_) | Expr::Column(_) | Expr::Param(_) => false,
            Expr::Unary { expr, .. } => expr.has_aggregate(),
            Expr::BinOp { lhs, rhs, .. } => lhs.has_aggregate() || rhs.has_aggregate(),
            Expr::FnCall { name, args, .. } => {
                AGGREGATE_NAMES.contains(&name.as_str())
                    || args.iter().any(|a| a.has_aggregate())
            }
        }
    }
}
