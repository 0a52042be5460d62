//! Evaluates expressions against one row, producing a value.
//!
//! Arithmetic follows the payload model: every number is an f64, so there
//! is no overflow class here, only division by zero. NULL propagates
//! through arithmetic and comparisons; AND/OR treat an unknown operand as
//! false, a simplification over full three-valued logic.

use std::collections::HashMap;

use crate::ast::{Constant, Expr, Op, UnaryOp};
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::sql_type::SqlType;
use crate::sql_value::{Datum, SqlValue};

pub fn constant_to_value(c: &Constant) -> SqlValue {
    match c {
        Constant::Int(i) => SqlValue::int(*i),
        Constant::Real(x) => SqlValue::double(*x),
        Constant::String(s) => SqlValue::text(s.clone()),
        Constant::Bool(b) => SqlValue::bool(*b),
        Constant::Null => SqlValue::null(SqlType::Int),
    }
}

pub fn eval_expr(
    expr: &Expr,
    row: Option<&HashMap<String, SqlValue>>,
    functions: &FunctionRegistry,
    params: &[SqlValue],
) -> Result<SqlValue> {
    match expr {
        Expr::Constant(c) => Ok(constant_to_value(c)),
        Expr::Column(name) => match row.and_then(|r| r.get(name)) {
            Some(v) => Ok(v.clone()),
            None => Err(Error::UndefinedColumn(name.clone())),
        },
        Expr::Param(i) => params
            .get(*i)
            .cloned()
            .ok_or_else(|| Error::Syntax(format!("parameter {} is not bound", i + 1))),
        Expr::Unary { op, expr } => {
            let v = eval_expr(expr, row, functions, params)?;
            eval_unary(*op, v)
        }
        Expr::BinOp { lhs, op, rhs } => {
            let l = eval_expr(lhs, row, functions, params)?;
            let r = eval_expr(rhs, row, functions, params)?;
            eval_binop(l, *op, r)
        }
        Expr::FnCall { name, args, star } => {
            if *star {
                return Err(Error::Syntax(format!(
                    "{}(*) is only allowed as an aggregate in a select list",
                    name
                )));
            }
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval_expr(a, row, functions, params)?);
            }
            let f = functions.lookup(name)?;
            f(&values)
        }
    }
}

fn eval_unary(op: UnaryOp, v: SqlValue) -> Result<SqlValue> {
    if v.is_null() {
        return Ok(v);
    }
    match op {
        UnaryOp::Neg => match &v.datum {
            Datum::Num(x) => Ok(SqlValue { sql_type: v.sql_type, datum: Datum::Num(-x) }),
            _ => Err(Error::Syntax(String::from("unary minus needs a numeric operand"))),
        },
        UnaryOp::Not => match &v.datum {
            Datum::Bool(b) => Ok(SqlValue::bool(!b)),
            _ => Err(Error::Syntax(String::from("NOT needs a boolean operand"))),
        },
    }
}

fn eval_binop(l: SqlValue, op: Op, r: SqlValue) -> Result<SqlValue> {
    match op {
        Op::Add | Op::Subtract | Op::Multiply | Op::Divide => {
            if l.is_null() || r.is_null() {
                return Ok(SqlValue::null(SqlType::Double));
            }
            let a = l
                .as_f64()
                .ok_or_else(|| Error::Syntax(format!("operator {} needs numeric operands", op)))?;
            let b = r
                .as_f64()
                .ok_or_else(|| Error::Syntax(format!("operator {} needs numeric operands", op)))?;
            let result = match op {
                Op::Add => a + b,
                Op::Subtract => a - b,
                Op::Multiply => a * b,
                Op::Divide => {
                    if b == 0.0 {
                        return Err(Error::DivisionByZero);
                    }
                    a / b
                }
                _ => unreachable!(),
            };
            // Integer inputs keep an integer result type except through
            // division.
            if l.sql_type.is_integer() && r.sql_type.is_integer() && op != Op::Divide {
                Ok(SqlValue::bigint(result as i64))
            } else {
                Ok(SqlValue::double(result))
            }
        }
        Op::Eq | Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq => {
            if l.is_null() || r.is_null() {
                return Ok(SqlValue::null(SqlType::Boolean));
            }
            let ord = l.compare(&r).ok_or_else(|| {
                Error::Syntax(format!("cannot compare {} and {}", l.sql_type, r.sql_type))
            })?;
            let b = match op {
                Op::Eq => ord.is_eq(),
                Op::NotEq => !ord.is_eq(),
                Op::Lt => ord.is_lt(),
                Op::LtEq => ord.is_le(),
                Op::Gt => ord.is_gt(),
                Op::GtEq => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(SqlValue::bool(b))
        }
        Op::And => Ok(SqlValue::bool(l.is_true() && r.is_true())),
        Op::Or => Ok(SqlValue::bool(l.is_true() || r.is_true())),
    }
}
