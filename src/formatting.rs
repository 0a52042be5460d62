//! Formats result tables for interactive output.

use itertools::Itertools;

use crate::temp_table::TempTable;

/// Renders a result table with padded columns and a row-count footer.
pub fn format_table(tt: &TempTable) -> String {
    let mut widths: Vec<usize> = tt.column_names.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = tt
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }
    let mut out = String::new();
    out.push_str(&join_row(&tt.column_names, &widths));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&join_row(&rule, &widths).replace(" | ", "-+-"));
    out.push('\n');
    for row in &rendered {
        out.push_str(&join_row(row, &widths));
        out.push('\n');
    }
    out.push_str(&format!(
        "({} row{})\n",
        rendered.len(),
        if rendered.len() == 1 { "" } else { "s" }
    ));
    out
}

fn join_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let joined = cells
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<1$}", c.as_ref(), widths.get(i).copied().unwrap_or(0)))
        .join(" | ");
    String::from(joined.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_value::SqlValue;

    #[test]
    fn test_format_table() {
        let tt = TempTable {
            column_names: vec![String::from("A"), String::from("NAME")],
            rows: vec![
                vec![SqlValue::int(1), SqlValue::text("one")],
                vec![SqlValue::int(20), SqlValue::text("twenty")],
            ],
        };
        let s = format_table(&tt);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines[0], "A  | NAME");
        assert_eq!(lines[1], "---+-------");
        assert_eq!(lines[2], "1  | one");
        assert_eq!(lines[3], "20 | twenty");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn test_format_single_row() {
        let tt = TempTable {
            column_names: vec![String::from("COUNT")],
            rows: vec![vec![SqlValue::bigint(1)]],
        };
        assert!(format_table(&tt).ends_with("(1 row)\n"));
    }
}
