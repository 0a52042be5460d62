//! Executes query IR blocks, producing a `TempTable` of result rows.
//!
//! Execution is straightforwardly recursive: each block materializes its
//! input before operating on it. Scans consult the connection's virtual
//! tables before the stored catalog, so a registered provider can shadow a
//! stored table of the same name.

use std::collections::HashMap;

use crate::ast::{Expr, SelItem, AGGREGATE_NAMES};
use crate::connection::VirtualTableProvider;
use crate::error::{Error, Result};
use crate::eval::eval_expr;
use crate::functions::FunctionRegistry;
use crate::ir;
use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;
use crate::storage::{Storage, Visibility};
use crate::temp_table::TempTable;

/// Everything one query execution needs: storage under a visibility, the
/// connection's function registry and virtual tables, and bound parameters.
pub struct QueryCtx<'a> {
    pub storage: &'a mut Storage,
    pub vis: &'a Visibility,
    pub functions: &'a FunctionRegistry,
    pub virtual_tables: &'a HashMap<String, Box<dyn VirtualTableProvider>>,
    pub params: &'a [SqlValue],
}

pub fn run_ir(ctx: &mut QueryCtx, block: &ir::Block) -> Result<TempTable> {
    match block {
        ir::Block::ConstantRows(cr) => run_constant_rows(ctx, cr),
        ir::Block::Scan(s) => run_scan(ctx, s),
        ir::Block::Filter(f) => run_filter(ctx, f),
        ir::Block::Project(p) => run_project(ctx, p),
        ir::Block::OffsetFetch(of) => run_offset_fetch(ctx, of),
    }
}

fn run_constant_rows(ctx: &mut QueryCtx, cr: &ir::ConstantRows) -> Result<TempTable> {
    let mut rows = Vec::with_capacity(cr.rows.len());
    for exprs in &cr.rows {
        let mut row = Vec::with_capacity(exprs.len());
        for e in exprs {
            row.push(eval_expr(e, None, ctx.functions, ctx.params)?);
        }
        rows.push(row);
    }
    Ok(TempTable { column_names: cr.column_names.clone(), rows })
}

fn run_scan(ctx: &mut QueryCtx, s: &ir::Scan) -> Result<TempTable> {
    if let Some(provider) = ctx.virtual_tables.get(&s.table_name) {
        return Ok(TempTable {
            column_names: provider.column_names(),
            rows: provider.rows()?,
        });
    }
    let table = ctx.storage.get_table(ctx.vis, &s.table_name)?;
    let stored = ctx.storage.scan_table(ctx.vis, &table)?;
    let column_names = table.column_names();
    let mut rows = Vec::with_capacity(stored.len());
    for row in stored {
        let mut out = Vec::with_capacity(column_names.len());
        for name in &column_names {
            let v = row.get(name).cloned().ok_or_else(|| {
                Error::Corrupt(format!("stored row is missing column \"{}\"", name))
            })?;
            out.push(v);
        }
        rows.push(out);
    }
    Ok(TempTable { column_names, rows })
}

/// Column references resolve against the input's columns even when no rows
/// flow, so a bad name errors on an empty table too.
pub(crate) fn check_columns(expr: &Expr, names: &[String]) -> Result<()> {
    match expr {
        Expr::Column(c) => {
            if !names.contains(c) {
                return Err(Error::UndefinedColumn(c.clone()));
            }
            Ok(())
        }
        Expr::Constant(_) | Expr::Param(_) => Ok(()),
        Expr::Unary { expr, .. } => check_columns(expr, names),
        Expr::BinOp { lhs, rhs, .. } => {
            check_columns(lhs, names)?;
            check_columns(rhs, names)
        }
        Expr::FnCall { args, .. } => {
            for a in args {
                check_columns(a, names)?;
            }
            Ok(())
        }
    }
}

fn run_filter(ctx: &mut QueryCtx, f: &ir::Filter) -> Result<TempTable> {
    let input = run_ir(ctx, &f.input)?;
    check_columns(&f.predicate, &input.column_names)?;
    let mut rows = Vec::with_capacity(input.rows.len());
    for row in input.rows {
        let map = row_map(&input.column_names, &row);
        if eval_expr(&f.predicate, Some(&map), ctx.functions, ctx.params)?.is_true() {
            rows.push(row);
        }
    }
    Ok(TempTable { column_names: input.column_names, rows })
}

fn run_project(ctx: &mut QueryCtx, p: &ir::Project) -> Result<TempTable> {
    let input = run_ir(ctx, &p.input)?;
    let has_aggregate = p.items.iter().any(|item| match item {
        SelItem::Expr { expr, .. } => expr.has_aggregate(),
        SelItem::Star => false,
    });
    if has_aggregate {
        project_aggregates(ctx, &p.items, &input)
    } else {
        project_rows(ctx, &p.items, &input)
    }
}

fn project_rows(ctx: &mut QueryCtx, items: &[SelItem], input: &TempTable) -> Result<TempTable> {
    let mut column_names = vec![];
    for (i, item) in items.iter().enumerate() {
        match item {
            SelItem::Star => column_names.extend(input.column_names.iter().cloned()),
            SelItem::Expr { expr, alias } => {
                check_columns(expr, &input.column_names)?;
                column_names.push(item_name(expr, alias, i));
            }
        }
    }
    let mut rows = Vec::with_capacity(input.rows.len());
    for row in &input.rows {
        let map = row_map(&input.column_names, row);
        let mut out = vec![];
        for item in items {
            match item {
                SelItem::Star => out.extend(row.iter().cloned()),
                SelItem::Expr { expr, .. } => {
                    out.push(eval_expr(expr, Some(&map), ctx.functions, ctx.params)?)
                }
            }
        }
        rows.push(out);
    }
    Ok(TempTable { column_names, rows })
}

fn project_aggregates(
    ctx: &mut QueryCtx,
    items: &[SelItem],
    input: &TempTable,
) -> Result<TempTable> {
    let mut column_names = vec![];
    let mut row = vec![];
    for (i, item) in items.iter().enumerate() {
        let (expr, alias) = match item {
            SelItem::Expr { expr, alias } => (expr, alias),
            SelItem::Star => {
                return Err(Error::Syntax(String::from(
                    "cannot mix * with aggregate functions",
                )))
            }
        };
        let (name, args, star) = match expr {
            Expr::FnCall { name, args, star } if AGGREGATE_NAMES.contains(&name.as_str()) => {
                (name, args, star)
            }
            _ => {
                return Err(Error::Syntax(String::from(
                    "select items must all be aggregates when any is",
                )))
            }
        };
        for a in args {
            check_columns(a, &input.column_names)?;
        }
        column_names.push(alias.clone().unwrap_or_else(|| name.clone()));
        row.push(eval_aggregate(ctx, name, args, *star, input, i)?);
    }
    Ok(TempTable { column_names, rows: vec![row] })
}

fn eval_aggregate(
    ctx: &mut QueryCtx,
    name: &str,
    args: &[Expr],
    star: bool,
    input: &TempTable,
    position: usize,
) -> Result<SqlValue> {
    if name == "COUNT" && star {
        return Ok(SqlValue::bigint(input.rows.len() as i64));
    }
    if star || args.len() != 1 {
        return Err(Error::Syntax(format!(
            "aggregate {} takes one argument (select item {})",
            name,
            position + 1
        )));
    }
    let mut values = vec![];
    for row in &input.rows {
        let map = row_map(&input.column_names, row);
        let v = eval_expr(&args[0], Some(&map), ctx.functions, ctx.params)?;
        if !v.is_null() {
            values.push(v);
        }
    }
    match name {
        "COUNT" => Ok(SqlValue::bigint(values.len() as i64)),
        "SUM" | "AVG" => {
            if values.is_empty() {
                return Ok(SqlValue::null(SqlType::Double));
            }
            let mut sum = 0.0;
            for v in &values {
                sum += v.as_f64().ok_or_else(|| {
                    Error::Syntax(format!("aggregate {} needs numeric input", name))
                })?;
            }
            if name == "AVG" {
                sum /= values.len() as f64;
            }
            Ok(SqlValue::double(sum))
        }
        "MIN" | "MAX" => {
            let mut best: Option<SqlValue> = None;
            for v in values {
                best = match best {
                    None => Some(v),
                    Some(b) => {
                        let ord = v.compare(&b).ok_or_else(|| {
                            Error::Syntax(format!("aggregate {} input is not comparable", name))
                        })?;
                        let keep_new =
                            (name == "MIN" && ord.is_lt()) || (name == "MAX" && ord.is_gt());
                        Some(if keep_new { v } else { b })
                    }
                };
            }
            Ok(best.unwrap_or(SqlValue::null(SqlType::Double)))
        }
        _ => Err(Error::UndefinedFunction(String::from(name))),
    }
}

fn run_offset_fetch(ctx: &mut QueryCtx, of: &ir::OffsetFetch) -> Result<TempTable> {
    let input = run_ir(ctx, &of.input)?;
    let rows: Vec<_> = input
        .rows
        .into_iter()
        .skip(of.offset as usize)
        .take(of.fetch.map(|n| n as usize).unwrap_or(usize::MAX))
        .collect();
    Ok(TempTable { column_names: input.column_names, rows })
}

fn row_map(names: &[String], row: &[SqlValue]) -> HashMap<String, SqlValue> {
    names.iter().cloned().zip(row.iter().cloned()).collect()
}

fn item_name(expr: &Expr, alias: &Option<String>, position: usize) -> String {
    if let Some(a) = alias {
        return a.clone();
    }
    match expr {
        Expr::Column(c) => c.clone(),
        Expr::FnCall { name, .. } => name.clone(),
        _ => format!("C{}", position + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_to_ir::select_to_ir;
    use crate::pt_to_ast::parse_statement;
    use crate::storage::MEMORY_PATH;

    fn run_query(sql: &str) -> Result<TempTable> {
        let mut storage = Storage::open(MEMORY_PATH, None).unwrap();
        let vis = storage.visibility(storage.peek_tid(), None);
        let functions = FunctionRegistry::with_builtins();
        let virtual_tables = HashMap::new();
        let stmt = parse_statement(sql)?;
        let block = select_to_ir(stmt.as_select().unwrap())?;
        let mut ctx = QueryCtx {
            storage: &mut storage,
            vis: &vis,
            functions: &functions,
            virtual_tables: &virtual_tables,
            params: &[],
        };
        run_ir(&mut ctx, &block)
    }

    #[test]
    fn test_select_without_from() {
        let tt = run_query("SELECT 1 + 1 AS two, 'x'").unwrap();
        assert_eq!(tt.column_names, vec!["TWO", "C2"]);
        assert_eq!(tt.rows, vec![vec![SqlValue::bigint(2), SqlValue::text("x")]]);
    }

    #[test]
    fn test_values_scan_filter_window() {
        let tt = run_query(
            "SELECT C1 FROM (VALUES (1), (2), (3), (4), (5)) AS v WHERE C1 > 1 OFFSET 1 ROWS FETCH FIRST 2 ROWS ONLY",
        )
        .unwrap();
        assert_eq!(tt.column_names, vec!["C1"]);
        assert_eq!(tt.rows, vec![vec![SqlValue::int(3)], vec![SqlValue::int(4)]]);
    }

    #[test]
    fn test_aggregates_over_values() {
        let tt = run_query("SELECT COUNT(*), SUM(C1), MIN(C1), MAX(C1), AVG(C1) FROM (VALUES (1), (2), (3)) AS v")
            .unwrap();
        assert_eq!(tt.column_names, vec!["COUNT", "SUM", "MIN", "MAX", "AVG"]);
        assert_eq!(
            tt.rows,
            vec![vec![
                SqlValue::bigint(3),
                SqlValue::double(6.0),
                SqlValue::int(1),
                SqlValue::int(3),
                SqlValue::double(2.0),
            ]]
        );
    }

    #[test]
    fn test_count_ignores_nulls() {
        let tt = run_query("SELECT COUNT(C1) FROM (VALUES (1), (NULL), (3)) AS v").unwrap();
        assert_eq!(tt.rows, vec![vec![SqlValue::bigint(2)]]);
    }

    #[test]
    fn test_aggregate_over_empty_input() {
        let tt =
            run_query("SELECT COUNT(*), SUM(C1) FROM (VALUES (1)) AS v WHERE C1 > 9").unwrap();
        assert_eq!(tt.rows.len(), 1);
        assert_eq!(tt.rows[0][0], SqlValue::bigint(0));
        assert!(tt.rows[0][1].is_null());
    }

    #[test]
    fn test_mixed_aggregate_and_plain_rejected() {
        assert!(run_query("SELECT C1, COUNT(*) FROM (VALUES (1)) AS v").is_err());
    }

    #[test]
    fn test_scan_missing_table() {
        let err = run_query("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.sqlstate(), "42P01");
    }
}
