//! `pt_to_ast` has routines for converting parse trees to ASTs for SQL.
//!
//! A pest parse tree has one enum for all terminals and non-terminals; the
//! AST has enums per production group. Conversion also discards lexical
//! detail: identifiers fold to uppercase here, string literals lose their
//! quotes, and `?` placeholders are numbered left to right.

use std::cell::Cell;
use std::str::FromStr;

use pest::iterators::Pair;
use pest::Parser;

use crate::ast::{self, Constant, Expr, Op, SelItem, Statement, TableExpr, UnaryOp};
use crate::error::{Error, Result};
use crate::parser::{Rule, SQLParser, PRATT_PARSER};
use crate::sql_type::SqlType;

pub fn parse_statement(sql: &str) -> Result<Statement> {
    let mut pairs =
        SQLParser::parse(Rule::statement, sql).map_err(|e| Error::Syntax(e.to_string()))?;
    let statement = pairs.next().expect("statement rule yields one pair");
    let params = Cell::new(0_usize);
    for p in statement.into_inner() {
        let stmt = match p.as_rule() {
            Rule::create_stmt => Statement::CreateTable(create_to_ast(p)?),
            Rule::drop_stmt => Statement::DropTable(drop_to_ast(p)),
            Rule::insert_stmt => Statement::Insert(insert_to_ast(p, &params)?),
            Rule::update_stmt => Statement::Update(update_to_ast(p, &params)?),
            Rule::delete_stmt => Statement::Delete(delete_to_ast(p, &params)?),
            Rule::select_stmt => Statement::Select(select_to_ast(p, &params)?),
            Rule::values_stmt => Statement::Select(values_stmt_to_ast(p, &params)?),
            Rule::start_stmt => Statement::StartTransaction,
            Rule::commit_stmt => Statement::Commit,
            Rule::rollback_stmt => Statement::Rollback,
            Rule::EOI => continue,
            _ => unreachable!(),
        };
        return Ok(stmt);
    }
    Err(Error::Syntax(String::from("empty statement")))
}

fn create_to_ast(pair: Pair<Rule>) -> Result<ast::CreateTableStatement> {
    let mut tablename = String::new();
    let mut coldefs = vec![];
    let mut primary_key = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::table_identifier => tablename = c.as_str().to_uppercase(),
            Rule::column_defs => {
                for column_def in c.into_inner() {
                    let mut inner = column_def.into_inner();
                    let colname = inner.next().expect("column name").as_str().to_uppercase();
                    let type_pair = inner.next().expect("column type");
                    let coltype = SqlType::from_str(type_pair.as_str()).map_err(|_| {
                        Error::Syntax(format!("unknown type \"{}\"", type_pair.as_str()))
                    })?;
                    let not_null = inner.next().is_some();
                    coldefs.push(ast::ColDef { colname, coltype, not_null });
                }
            }
            Rule::primary_key_clause => {
                let col = c.into_inner().next().expect("primary key column");
                primary_key = Some(col.as_str().to_uppercase());
            }
            _ => unreachable!(),
        }
    }
    Ok(ast::CreateTableStatement { tablename, coldefs, primary_key })
}

fn drop_to_ast(pair: Pair<Rule>) -> ast::DropTableStatement {
    let name = pair.into_inner().next().expect("table name");
    ast::DropTableStatement { tablename: name.as_str().to_uppercase() }
}

fn insert_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<ast::InsertStatement> {
    let mut tablename = String::new();
    let mut columns = None;
    let mut rows = vec![];
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::table_identifier => tablename = c.as_str().to_uppercase(),
            Rule::column_list => {
                columns =
                    Some(c.into_inner().map(|p| p.as_str().to_uppercase()).collect::<Vec<_>>())
            }
            Rule::values_clause => rows = values_rows(c, params)?,
            _ => unreachable!(),
        }
    }
    Ok(ast::InsertStatement { tablename, columns, rows })
}

fn values_rows(pair: Pair<Rule>, params: &Cell<usize>) -> Result<Vec<Vec<Expr>>> {
    pair.into_inner()
        .map(|row| row.into_inner().map(|e| expr_to_ast(e, params)).collect())
        .collect()
}

fn update_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<ast::UpdateStatement> {
    let mut tablename = String::new();
    let mut assignments = vec![];
    let mut where_clause = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::table_identifier => tablename = c.as_str().to_uppercase(),
            Rule::assignment => {
                let mut inner = c.into_inner();
                let col = inner.next().expect("assignment column").as_str().to_uppercase();
                let value = expr_to_ast(inner.next().expect("assignment value"), params)?;
                assignments.push((col, value));
            }
            Rule::where_clause => where_clause = Some(where_to_ast(c, params)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::UpdateStatement { tablename, assignments, where_clause })
}

fn delete_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<ast::DeleteStatement> {
    let mut tablename = String::new();
    let mut where_clause = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::table_identifier => tablename = c.as_str().to_uppercase(),
            Rule::where_clause => where_clause = Some(where_to_ast(c, params)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::DeleteStatement { tablename, where_clause })
}

fn select_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<ast::SelectStatement> {
    let mut items = vec![];
    let mut from = None;
    let mut where_clause = None;
    let mut offset = None;
    let mut fetch = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::select_items => {
                for item in c.into_inner() {
                    items.push(select_item_to_ast(item, params)?);
                }
            }
            Rule::from_clause => {
                let te = c.into_inner().next().expect("table expression");
                from = Some(table_expr_to_ast(te, params)?);
            }
            Rule::where_clause => where_clause = Some(where_to_ast(c, params)?),
            Rule::offset_clause => offset = Some(clause_count(c)?),
            Rule::fetch_clause => fetch = Some(clause_count(c)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::SelectStatement { items, from, where_clause, offset, fetch })
}

fn values_stmt_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<ast::SelectStatement> {
    let clause = pair.into_inner().next().expect("values clause");
    Ok(ast::SelectStatement {
        items: vec![SelItem::Star],
        from: Some(TableExpr::Values { rows: values_rows(clause, params)?, alias: None }),
        where_clause: None,
        offset: None,
        fetch: None,
    })
}

fn select_item_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<SelItem> {
    let inner = pair.into_inner().next().expect("select item holds one node");
    match inner.as_rule() {
        Rule::star => Ok(SelItem::Star),
        Rule::aliased_expr => {
            let mut it = inner.into_inner();
            let expr = expr_to_ast(it.next().expect("expression"), params)?;
            let alias = it.next().map(|a| a.as_str().to_uppercase());
            Ok(SelItem::Expr { expr, alias })
        }
        _ => unreachable!(),
    }
}

fn table_expr_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<TableExpr> {
    let inner = pair.into_inner().next().expect("table expr holds one node");
    match inner.as_rule() {
        Rule::table_identifier => Ok(TableExpr::Named(inner.as_str().to_uppercase())),
        Rule::derived_table => {
            let mut query = None;
            let mut values = None;
            let mut alias = None;
            for c in inner.into_inner() {
                match c.as_rule() {
                    Rule::select_stmt => query = Some(select_to_ast(c, params)?),
                    Rule::values_clause => values = Some(values_rows(c, params)?),
                    Rule::identifier => alias = Some(c.as_str().to_uppercase()),
                    _ => unreachable!(),
                }
            }
            match (query, values) {
                (Some(q), None) => Ok(TableExpr::Derived { query: Box::new(q), alias }),
                (None, Some(rows)) => Ok(TableExpr::Values { rows, alias }),
                _ => unreachable!(),
            }
        }
        _ => unreachable!(),
    }
}

fn where_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<Expr> {
    expr_to_ast(pair.into_inner().next().expect("where expression"), params)
}

fn clause_count(pair: Pair<Rule>) -> Result<u64> {
    let n = pair.into_inner().next().expect("row count");
    n.as_str()
        .parse()
        .map_err(|_| Error::Syntax(format!("bad row count \"{}\"", n.as_str())))
}

pub fn expr_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::expr);
    PRATT_PARSER
        .map_primary(|p| primary_to_ast(p, params))
        .map_prefix(|op, rhs| {
            let expr = Box::new(rhs?);
            Ok(match op.as_rule() {
                Rule::neg_op => Expr::Unary { op: UnaryOp::Neg, expr },
                Rule::not_op => Expr::Unary { op: UnaryOp::Not, expr },
                _ => unreachable!(),
            })
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or_op => Op::Or,
                Rule::and_op => Op::And,
                Rule::eq_op => Op::Eq,
                Rule::neq_op => Op::NotEq,
                Rule::lt_op => Op::Lt,
                Rule::lte_op => Op::LtEq,
                Rule::gt_op => Op::Gt,
                Rule::gte_op => Op::GtEq,
                Rule::add_op => Op::Add,
                Rule::sub_op => Op::Subtract,
                Rule::mul_op => Op::Multiply,
                Rule::div_op => Op::Divide,
                _ => unreachable!(),
            };
            Ok(Expr::BinOp { lhs: Box::new(lhs?), op, rhs: Box::new(rhs?) })
        })
        .parse(pair.into_inner())
}

fn primary_to_ast(pair: Pair<Rule>, params: &Cell<usize>) -> Result<Expr> {
    let inner = pair.into_inner().next().expect("primary holds one node");
    match inner.as_rule() {
        Rule::integer_literal => {
            let n: i64 = inner
                .as_str()
                .parse()
                .map_err(|_| Error::Syntax(format!("integer \"{}\" out of range", inner.as_str())))?;
            Ok(Expr::Constant(Constant::Int(n)))
        }
        Rule::decimal_literal => {
            let x: f64 = inner
                .as_str()
                .parse()
                .map_err(|_| Error::Syntax(format!("bad numeric literal \"{}\"", inner.as_str())))?;
            Ok(Expr::Constant(Constant::Real(x)))
        }
        Rule::string_literal => Ok(Expr::Constant(Constant::String(unquote(inner.as_str())))),
        Rule::true_literal => Ok(Expr::Constant(Constant::Bool(true))),
        Rule::false_literal => Ok(Expr::Constant(Constant::Bool(false))),
        Rule::null_literal => Ok(Expr::Constant(Constant::Null)),
        Rule::parameter => {
            let i = params.get();
            params.set(i + 1);
            Ok(Expr::Param(i))
        }
        Rule::paren_expr => {
            expr_to_ast(inner.into_inner().next().expect("parenthesized expr"), params)
        }
        Rule::column_name => Ok(Expr::Column(inner.as_str().to_uppercase())),
        Rule::function_call => {
            let mut it = inner.into_inner();
            let name = it.next().expect("function name").as_str().to_uppercase();
            let mut args = vec![];
            let mut star = false;
            for a in it {
                match a.as_rule() {
                    Rule::star => star = true,
                    Rule::expr => args.push(expr_to_ast(a, params)?),
                    _ => unreachable!(),
                }
            }
            Ok(Expr::FnCall { name, args, star })
        }
        _ => unreachable!(),
    }
}

fn unquote(s: &str) -> String {
    debug_assert!(s.len() >= 2);
    s[1..s.len() - 1].replace("''", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_statement() {
        let actual = parse_statement("CREATE TABLE t (a int, b VARCHAR(5) NOT NULL, PRIMARY KEY (a))")
            .unwrap();
        let expected = Statement::CreateTable(ast::CreateTableStatement {
            tablename: String::from("T"),
            coldefs: vec![
                ast::ColDef {
                    colname: String::from("A"),
                    coltype: SqlType::Int,
                    not_null: false,
                },
                ast::ColDef {
                    colname: String::from("B"),
                    coltype: SqlType::Varchar(5),
                    not_null: true,
                },
            ],
            primary_key: Some(String::from("A")),
        });
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_parse_insert_statement() {
        let actual = parse_statement("INSERT INTO t (a, b) VALUES (1, 'x''y'), (2, NULL)").unwrap();
        let expected = Statement::Insert(ast::InsertStatement {
            tablename: String::from("T"),
            columns: Some(vec![String::from("A"), String::from("B")]),
            rows: vec![
                vec![
                    Expr::Constant(Constant::Int(1)),
                    Expr::Constant(Constant::String(String::from("x'y"))),
                ],
                vec![Expr::Constant(Constant::Int(2)), Expr::Constant(Constant::Null)],
            ],
        });
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_parse_select_with_everything() {
        let stmt = parse_statement(
            "SELECT a, a + 1 AS next FROM t WHERE a >= 2 AND a < 9 OFFSET 1 ROWS FETCH FIRST 3 ROWS ONLY",
        )
        .unwrap();
        let select = stmt.as_select().unwrap();
        assert_eq!(select.items.len(), 2);
        assert_eq!(
            select.items[1],
            SelItem::Expr {
                expr: Expr::BinOp {
                    lhs: Box::new(Expr::Column(String::from("A"))),
                    op: Op::Add,
                    rhs: Box::new(Expr::Constant(Constant::Int(1))),
                },
                alias: Some(String::from("NEXT")),
            }
        );
        assert_eq!(select.from, Some(TableExpr::Named(String::from("T"))));
        assert_eq!(select.offset, Some(1));
        assert_eq!(select.fetch, Some(3));
        assert!(select.where_clause.is_some());
    }

    #[test]
    fn test_expression_precedence() {
        let stmt = parse_statement("SELECT 1 + 2 * 3").unwrap();
        let select = stmt.as_select().unwrap();
        let (expr, _) = select.items[0].as_expr().unwrap();
        // Multiplication binds tighter than addition.
        assert_eq!(
            *expr,
            Expr::BinOp {
                lhs: Box::new(Expr::Constant(Constant::Int(1))),
                op: Op::Add,
                rhs: Box::new(Expr::BinOp {
                    lhs: Box::new(Expr::Constant(Constant::Int(2))),
                    op: Op::Multiply,
                    rhs: Box::new(Expr::Constant(Constant::Int(3))),
                }),
            }
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let stmt = parse_statement("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3").unwrap();
        let select = stmt.as_select().unwrap();
        let top = select.where_clause.as_ref().unwrap();
        match top {
            Expr::BinOp { op: Op::Or, .. } => {}
            other => panic!("expected OR at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_parameters_number_left_to_right() {
        let stmt = parse_statement("SELECT * FROM t WHERE a = ? AND b = ?").unwrap();
        let select = stmt.as_select().unwrap();
        let clause = select.where_clause.as_ref().unwrap();
        match clause {
            Expr::BinOp { lhs, rhs, .. } => {
                match (lhs.as_ref(), rhs.as_ref()) {
                    (Expr::BinOp { rhs: p0, .. }, Expr::BinOp { rhs: p1, .. }) => {
                        assert_eq!(**p0, Expr::Param(0));
                        assert_eq!(**p1, Expr::Param(1));
                    }
                    other => panic!("unexpected shape {:?}", other),
                }
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_parse_count_star() {
        let stmt = parse_statement("SELECT COUNT(*) FROM t").unwrap();
        let select = stmt.as_select().unwrap();
        let (expr, _) = select.items[0].as_expr().unwrap();
        assert_eq!(
            *expr,
            Expr::FnCall { name: String::from("COUNT"), args: vec![], star: true }
        );
    }

    #[test]
    fn test_parse_derived_table_and_values() {
        let stmt = parse_statement("SELECT * FROM (VALUES (1), (2)) AS v").unwrap();
        let select = stmt.as_select().unwrap();
        match select.from.as_ref().unwrap() {
            TableExpr::Values { rows, alias } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(alias.as_deref(), Some("V"));
            }
            other => panic!("expected VALUES source, got {:?}", other),
        }
        let stmt = parse_statement("SELECT * FROM (SELECT a FROM t) AS s").unwrap();
        let select = stmt.as_select().unwrap();
        assert!(matches!(select.from.as_ref().unwrap(), TableExpr::Derived { .. }));
    }

    #[test]
    fn test_syntax_error_reported() {
        let err = parse_statement("SELEC 1").unwrap_err();
        assert_eq!(err.sqlstate(), "42601");
    }

    #[test]
    fn test_transaction_statements() {
        assert_eq!(parse_statement("START TRANSACTION").unwrap(), Statement::StartTransaction);
        assert_eq!(parse_statement("COMMIT;").unwrap(), Statement::Commit);
        assert_eq!(parse_statement("rollback").unwrap(), Statement::Rollback);
    }
}
