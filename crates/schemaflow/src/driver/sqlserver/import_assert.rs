//! Expansion of import assertion macros into T-SQL verification blocks.
//!
//! Recognised macros:
//!
//! - `ASSERT_DATABASE_VERSION(expr)`: the source database must not yet carry
//!   `expr` as its `DatabaseSchemaVersion` extended property, the target must.
//! - `ASSERT_UNCHANGED_ROW_COUNT()`: target and source row counts of
//!   `__TABLE__` match. Left untouched when given an argument.
//! - `ASSERT_ROW_COUNT(expr)`: the target row count of `__TABLE__` equals `expr`.
//!
//! The generated SQL keeps the `__SOURCE__`, `__TARGET__` and `__TABLE__`
//! placeholders for the regular import substitution to fill in.

use crate::error::{FlowError, Result};

/// Expand every assertion macro in `sql`.
pub fn expand_import_asserts(sql: &str) -> Result<String> {
    let output = replace_macro(sql, "ASSERT_DATABASE_VERSION", |arg| {
        Some(database_version_assertion(arg))
    })?;
    let output = replace_macro(&output, "ASSERT_UNCHANGED_ROW_COUNT", |arg| {
        arg.is_empty().then(unchanged_row_count_assertion)
    })?;
    replace_macro(&output, "ASSERT_ROW_COUNT", |arg| Some(row_count_assertion(arg)))
}

/// Replace each `name(...)` invocation; `None` from `replacement` keeps the original text.
fn replace_macro<F>(sql: &str, name: &str, replacement: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let token = format!("{}(", name);
    let mut output = String::with_capacity(sql.len());
    let mut cursor = 0;
    while let Some(offset) = sql[cursor..].find(&token) {
        let start = cursor + offset;
        output.push_str(&sql[cursor..start]);
        let argument_start = start + token.len();
        let end = find_macro_end(sql, argument_start)?;
        let argument = sql[argument_start..end].trim();
        match replacement(argument) {
            Some(expanded) => output.push_str(&expanded),
            None => output.push_str(&sql[start..=end]),
        }
        cursor = end + 1;
    }
    output.push_str(&sql[cursor..]);
    Ok(output)
}

/// Byte index of the `)` closing a macro whose arguments start at `from`.
fn find_macro_end(sql: &str, from: usize) -> Result<usize> {
    let mut depth = 1usize;
    for (i, c) in sql[from..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(from + i);
                }
            }
            _ => {}
        }
    }
    Err(FlowError::runtime(format!(
        "Unterminated import assert expression in SQL: {}",
        sql
    )))
}

fn database_version_assertion(expected: &str) -> String {
    let escaped = expected.replace('\'', "''");
    format!(
        "GO
BEGIN
  DECLARE @DbVersion VARCHAR(MAX)
  SET @DbVersion = ''
  SELECT @DbVersion = COALESCE(CONVERT(VARCHAR(MAX),value),'')
    FROM [__SOURCE__].sys.fn_listextendedproperty('DatabaseSchemaVersion', default, default, default, default, default, default)
  IF (@DbVersion IS NULL OR @DbVersion = {expected})
  BEGIN
    DECLARE @Message VARCHAR(MAX)
    SET @Message = CONCAT('Expected DatabaseSchemaVersion in __SOURCE__ database not to be {escaped}. Actual Value: ', @DbVersion)
    RAISERROR (@Message, 16, 1) WITH SETERROR
  END
END
GO
BEGIN
  DECLARE @DbVersion VARCHAR(MAX)
  SET @DbVersion = ''
  SELECT @DbVersion = COALESCE(CONVERT(VARCHAR(MAX),value),'')
    FROM [__TARGET__].sys.fn_listextendedproperty('DatabaseSchemaVersion', default, default, default, default, default, default)
  IF (@DbVersion IS NULL OR @DbVersion != {expected})
  BEGIN
    DECLARE @Message VARCHAR(MAX)
    SET @Message = CONCAT('Expected DatabaseSchemaVersion in __TARGET__ database to be {escaped}. Actual Value: ', @DbVersion)
    RAISERROR (@Message, 16, 1) WITH SETERROR
  END
END
GO
"
    )
}

fn unchanged_row_count_assertion() -> String {
    "GO
IF (SELECT COUNT(*) FROM [__TARGET__].__TABLE__) != (SELECT COUNT(*) FROM [__SOURCE__].__TABLE__)
BEGIN
  RAISERROR ('Actual row count for __TABLE__ does not match expected rowcount', 16, 1) WITH SETERROR
END
"
    .to_string()
}

fn row_count_assertion(expected: &str) -> String {
    format!(
        "GO
IF (SELECT COUNT(*) FROM [__TARGET__].__TABLE__) != ({expected})
BEGIN
  RAISERROR ('Actual row count for __TABLE__ does not match expected rowcount', 16, 1) WITH SETERROR
END
"
    )
}
