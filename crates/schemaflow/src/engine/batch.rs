//! SQL text preparation: batch splitting and placeholder substitution.

/// Batch separator recognised on a line of its own.
pub const BATCH_SEPARATOR: &str = "GO";

/// Split `sql` into executable batches.
///
/// Carriage returns are dropped, a line holding only `GO` (any case, any
/// surrounding whitespace) ends the current batch, and blank batches are
/// discarded.
pub fn split_batches(sql: &str) -> Vec<String> {
    let normalized = sql.replace('\r', "");
    let mut batches = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.split('\n') {
        if line.trim().eq_ignore_ascii_case(BATCH_SEPARATOR) {
            push_batch(&mut batches, &mut current);
        } else {
            current.push(line);
        }
    }
    push_batch(&mut batches, &mut current);
    batches
}

fn push_batch(batches: &mut Vec<String>, current: &mut Vec<&str>) {
    let batch = current.join("\n");
    current.clear();
    if !batch.trim().is_empty() {
        batches.push(batch);
    }
}

/// Replace every `(pattern, value)` pair in order.
pub fn apply_filters(sql: &str, filters: &[(String, String)]) -> String {
    filters
        .iter()
        .fold(sql.to_string(), |text, (pattern, value)| text.replace(pattern.as_str(), value))
}

/// Fill in the import placeholders.
///
/// The table placeholders are only touched when a table is known.
pub fn import_substitute(sql: &str, table: Option<&str>, source: &str, target: &str) -> String {
    let mut text = sql.to_string();
    if let Some(table) = table {
        text = text.replace("@@TABLE@@", table).replace("__TABLE__", table);
    }
    text.replace("@@SOURCE@@", source)
        .replace("__SOURCE__", source)
        .replace("@@TARGET@@", target)
        .replace("__TARGET__", target)
}
