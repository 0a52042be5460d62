//! Lowers SELECT ASTs into chains of IR blocks.
//!
//! Derived tables lower recursively, so `FROM (SELECT ...)` becomes the
//! subquery's whole chain feeding the outer operators. VALUES constructors
//! become constant-row leaves with generated column names C1..Cn.

use crate::ast;
use crate::error::{Error, Result};
use crate::ir;

pub fn select_to_ir(s: &ast::SelectStatement) -> Result<ir::Block> {
    let base = match &s.from {
        // A FROM-less SELECT evaluates its items against one empty row.
        None => ir::Block::ConstantRows(ir::ConstantRows {
            column_names: vec![],
            rows: vec![vec![]],
        }),
        Some(ast::TableExpr::Named(name)) => {
            ir::Block::Scan(ir::Scan { table_name: name.clone() })
        }
        Some(ast::TableExpr::Derived { query, .. }) => select_to_ir(query)?,
        Some(ast::TableExpr::Values { rows, .. }) => {
            let width = rows.first().map(|r| r.len()).unwrap_or(0);
            if rows.iter().any(|r| r.len() != width) {
                return Err(Error::Syntax(String::from(
                    "VALUES rows must all have the same number of columns",
                )));
            }
            ir::Block::ConstantRows(ir::ConstantRows {
                column_names: (1..=width).map(|i| format!("C{}", i)).collect(),
                rows: rows.clone(),
            })
        }
    };
    let filtered = match &s.where_clause {
        Some(predicate) => ir::Block::Filter(ir::Filter {
            predicate: predicate.clone(),
            input: Box::new(base),
        }),
        None => base,
    };
    let projected = ir::Block::Project(ir::Project {
        items: s.items.clone(),
        input: Box::new(filtered),
    });
    if s.offset.is_some() || s.fetch.is_some() {
        return Ok(ir::Block::OffsetFetch(ir::OffsetFetch {
            offset: s.offset.unwrap_or(0),
            fetch: s.fetch,
            input: Box::new(projected),
        }));
    }
    Ok(projected)
}
