//! Interactive shell: reads statements from stdin against one database.
//!
//! Usage: `solodb [path]`; the path defaults to `:memory:`.

use std::io::{BufRead, Write};

use anyhow::Result;

use solodb::formatting::format_table;
use solodb::{Connection, OpenOptions};

fn main() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| String::from(solodb::MEMORY_PATH));
    let conn = Connection::open(&path, OpenOptions::default())?;
    println!("solodb: connected to {}", path);
    println!("Enter SQL statements, or .exit to quit.");
    let stdin = std::io::stdin();
    print_prompt();
    for line in stdin.lock().lines() {
        let line = line?;
        let sql = line.trim();
        if sql.is_empty() {
            print_prompt();
            continue;
        }
        if sql == ".exit" || sql == ".quit" {
            break;
        }
        match conn.query(sql) {
            Ok(result) => {
                if result.column_names.is_empty() {
                    println!("OK");
                } else {
                    print!("{}", format_table(&result));
                }
            }
            Err(e) => println!("{}: {}", e.sqlstate(), e),
        }
        print_prompt();
    }
    Ok(())
}

fn print_prompt() {
    print!("solodb> ");
    let _ = std::io::stdout().flush();
}
