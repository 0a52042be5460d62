//! The scalar function registry.
//!
//! Each connection owns a registry seeded with the builtins; hosts add their
//! own implementations through `Connection::register_function`. Lookup is by
//! uppercase name; calling an unregistered name is SQLSTATE `42883`.
//! Aggregates (COUNT and friends) are not registered here; they change the
//! shape of the result and live in the projection operator instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::sql_value::SqlValue;

pub type ScalarFn = Arc<dyn Fn(&[SqlValue]) -> Result<SqlValue> + Send + Sync>;

pub struct FunctionRegistry {
    map: HashMap<String, ScalarFn>,
}

impl FunctionRegistry {
    pub fn with_builtins() -> FunctionRegistry {
        let mut reg = FunctionRegistry { map: HashMap::new() };
        reg.insert("ABS", Arc::new(fn_abs));
        reg.insert("MOD", Arc::new(fn_mod));
        reg.insert("LENGTH", Arc::new(fn_length));
        reg.insert("UPPER", Arc::new(fn_upper));
        reg.insert("LOWER", Arc::new(fn_lower));
        reg
    }

    fn insert(&mut self, name: &str, f: ScalarFn) {
        self.map.insert(String::from(name), f);
    }

    /// Registers a host function under the name in `prototype`: everything
    /// before the first `(`, case-folded. `"FACTORIAL(INTEGER)"` and plain
    /// `"factorial"` both register `FACTORIAL`.
    pub fn register(&mut self, prototype: &str, f: ScalarFn) -> Result<()> {
        let name = prototype.split('(').next().unwrap_or("").trim().to_uppercase();
        if name.is_empty() {
            return Err(Error::Syntax(format!(
                "cannot derive a function name from prototype \"{}\"",
                prototype
            )));
        }
        self.map.insert(name, f);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&ScalarFn> {
        self.map
            .get(&name.to_uppercase())
            .ok_or_else(|| Error::UndefinedFunction(name.to_uppercase()))
    }
}

fn want_args(name: &str, args: &[SqlValue], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(Error::Syntax(format!(
            "{} takes {} argument{}, got {}",
            name,
            n,
            if n == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn numeric_arg(name: &str, v: &SqlValue) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| Error::Syntax(format!("{} takes a numeric argument", name)))
}

fn text_arg(name: &str, v: &SqlValue) -> Result<String> {
    v.as_text()
        .map(String::from)
        .ok_or_else(|| Error::Syntax(format!("{} takes a character argument", name)))
}

fn fn_abs(args: &[SqlValue]) -> Result<SqlValue> {
    want_args("ABS", args, 1)?;
    if args[0].is_null() {
        return Ok(args[0].clone());
    }
    Ok(SqlValue::double(numeric_arg("ABS", &args[0])?.abs()))
}

fn fn_mod(args: &[SqlValue]) -> Result<SqlValue> {
    want_args("MOD", args, 2)?;
    if args[0].is_null() || args[1].is_null() {
        return Ok(SqlValue::null(crate::sql_type::SqlType::Double));
    }
    let a = numeric_arg("MOD", &args[0])?;
    let b = numeric_arg("MOD", &args[1])?;
    if b == 0.0 {
        return Err(Error::DivisionByZero);
    }
    Ok(SqlValue::double(a % b))
}

fn fn_length(args: &[SqlValue]) -> Result<SqlValue> {
    want_args("LENGTH", args, 1)?;
    if args[0].is_null() {
        return Ok(args[0].clone());
    }
    Ok(SqlValue::bigint(text_arg("LENGTH", &args[0])?.chars().count() as i64))
}

fn fn_upper(args: &[SqlValue]) -> Result<SqlValue> {
    want_args("UPPER", args, 1)?;
    if args[0].is_null() {
        return Ok(args[0].clone());
    }
    Ok(SqlValue::text(text_arg("UPPER", &args[0])?.to_uppercase()))
}

fn fn_lower(args: &[SqlValue]) -> Result<SqlValue> {
    want_args("LOWER", args, 1)?;
    if args[0].is_null() {
        return Ok(args[0].clone());
    }
    Ok(SqlValue::text(text_arg("LOWER", &args[0])?.to_lowercase()))
}
