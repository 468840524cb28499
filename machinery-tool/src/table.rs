//! Parses a tool's headered tabular output (`docker-machine ls`, `docker
//! ps`, `docker node ls`, ...) into records (spec §4.9).
//!
//! Column boundaries are computed from the first occurrence of each header
//! string in the header line, trailing whitespace is trimmed, and header
//! names are lowercased with spaces replaced by underscores unless an
//! explicit override is given.

use indexmap::IndexMap;
use std::collections::HashMap;

/// Normalizes a header token into its record key, honoring `overrides`
/// (e.g. `"CONTAINER ID" -> "CONTAINER_ID"`).
fn normalize_header(raw: &str, overrides: &HashMap<&str, &str>) -> String {
    if let Some(over) = overrides.get(raw) {
        return over.to_string();
    }
    raw.trim().to_lowercase().replace(' ', "_")
}

struct Column {
    key: String,
    start: usize,
}

/// Splits `header_line` into columns by locating the first occurrence of
/// each whitespace-delimited header token, in order. Multi-word headers
/// (like `"CONTAINER ID"`) are detected by checking `overrides` for a
/// matching prefix before falling back to single-token splitting.
fn split_header(header_line: &str, overrides: &HashMap<&str, &str>) -> Vec<Column> {
    let mut columns = Vec::new();

    // Try to match the longest known override key first so multi-word
    // headers aren't split into two columns.
    let mut remaining = header_line;
    let mut override_keys: Vec<&&str> = overrides.keys().collect();
    override_keys.sort_by_key(|k| std::cmp::Reverse(k.len()));

    while !remaining.trim().is_empty() {
        let mut matched = false;
        for key in &override_keys {
            if remaining.starts_with(**key) {
                let start = header_line.len() - remaining.len();
                columns.push(Column {
                    key: normalize_header(key, overrides),
                    start,
                });
                let consumed = key.len();
                remaining = &remaining[consumed..];
                matched = true;
                break;
            }
        }
        if matched {
            remaining = remaining.trim_start();
            continue;
        }
        let next_token_end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());
        let token = &remaining[..next_token_end];
        if !token.is_empty() {
            let start = header_line.len() - remaining.len();
            columns.push(Column {
                key: normalize_header(token, overrides),
                start,
            });
        }
        let rest = &remaining[next_token_end..];
        remaining = rest.trim_start();
    }
    columns
}

/// Turns tabular `rows` (first row is the header) into a list of records
/// keyed by normalized header name. `overrides` maps raw header text to an
/// explicit output key, e.g. `[("CONTAINER ID", "CONTAINER_ID")]`.
pub fn parse_table(rows: &[String], overrides: &[(&str, &str)]) -> Vec<IndexMap<String, String>> {
    let Some(header_line) = rows.first() else {
        return Vec::new();
    };
    let override_map: HashMap<&str, &str> = overrides.iter().copied().collect();
    let columns = split_header(header_line, &override_map);
    if columns.is_empty() {
        return Vec::new();
    }

    rows[1..]
        .iter()
        .filter(|row| !row.trim().is_empty())
        .map(|row| {
            let mut record = IndexMap::new();
            for (i, col) in columns.iter().enumerate() {
                let end = columns.get(i + 1).map(|c| c.start);
                let slice = if col.start >= row.len() {
                    ""
                } else {
                    match end {
                        Some(end) if end <= row.len() => &row[col.start..end],
                        _ => &row[col.start..],
                    }
                };
                record.insert(col.key.clone(), slice.trim().to_string());
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_machine_ls_style_table() {
        let rows = vec![
            "NAME      ACTIVE   DRIVER       STATE     URL".to_string(),
            "proj-n1   *        virtualbox   Running   tcp://192.168.99.100:2376".to_string(),
            "proj-n2            virtualbox   Stopped   ".to_string(),
        ];
        let records = parse_table(&rows, &[]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "proj-n1");
        assert_eq!(records[0]["active"], "*");
        assert_eq!(records[0]["state"], "Running");
        assert_eq!(records[1]["name"], "proj-n2");
        assert_eq!(records[1]["active"], "");
    }

    #[test]
    fn applies_header_overrides() {
        let rows = vec![
            "CONTAINER ID   IMAGE     STATUS".to_string(),
            "abc123         alpine    Up 2 minutes".to_string(),
        ];
        let records = parse_table(&rows, &[("CONTAINER ID", "CONTAINER_ID")]);
        assert_eq!(records[0]["CONTAINER_ID"], "abc123");
        assert_eq!(records[0]["image"], "alpine");
    }

    #[test]
    fn empty_input_yields_no_records() {
        assert!(parse_table(&[], &[]).is_empty());
    }

    #[test]
    fn blank_rows_are_skipped() {
        let rows = vec![
            "NAME   STATE".to_string(),
            "".to_string(),
            "n1     Running".to_string(),
        ];
        let records = parse_table(&rows, &[]);
        assert_eq!(records.len(), 1);
    }
}
