//! Timing template parser.
//!
//! Templates arrive as comma-delimited rows:
//! `relative_day,action_type,record_type,record_id_template,
//! associations_template,source_label,action_template,reason_template`.
//! Fields may be double-quoted to contain literal commas; `""` inside a
//! quoted field is an escaped quote. Blank lines and `#` comments are
//! skipped, as is an optional header row.

use simcrm_types::error::PlanningError;
use simcrm_types::template::TimingRow;

/// Number of columns in a template row. Trailing columns may be omitted.
const COLUMNS: usize = 8;

/// Parse a whole timing template document into rows.
pub fn parse_timing_template(input: &str) -> Result<Vec<TimingRow>, PlanningError> {
    let mut rows = Vec::new();

    for (idx, raw_line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if rows.is_empty() && line.starts_with("relative_day") {
            // Header row
            continue;
        }
        rows.push(parse_row(line, line_no)?);
    }

    Ok(rows)
}

fn parse_row(line: &str, line_no: usize) -> Result<TimingRow, PlanningError> {
    let mut fields = split_quoted(line).map_err(|message| PlanningError::TemplateParse {
        line: line_no,
        message,
    })?;

    if fields.len() < 3 {
        return Err(PlanningError::TemplateParse {
            line: line_no,
            message: format!("expected at least 3 columns, got {}", fields.len()),
        });
    }
    if fields.len() > COLUMNS {
        return Err(PlanningError::TemplateParse {
            line: line_no,
            message: format!("expected at most {COLUMNS} columns, got {}", fields.len()),
        });
    }
    fields.resize(COLUMNS, String::new());

    let relative_day: f64 = fields[0]
        .trim()
        .parse()
        .map_err(|_| PlanningError::TemplateParse {
            line: line_no,
            message: format!("invalid relative day '{}'", fields[0]),
        })?;

    let action_type = fields[1]
        .trim()
        .parse()
        .map_err(|message| PlanningError::TemplateParse {
            line: line_no,
            message,
        })?;

    let record_type = fields[2]
        .trim()
        .parse()
        .map_err(|message| PlanningError::TemplateParse {
            line: line_no,
            message,
        })?;

    let associations_template =
        parse_json_field(&fields[4]).map_err(|message| PlanningError::TemplateParse {
            line: line_no,
            message: format!("invalid associations JSON: {message}"),
        })?;

    let action_template =
        parse_json_field(&fields[6]).map_err(|message| PlanningError::TemplateParse {
            line: line_no,
            message: format!("invalid action template JSON: {message}"),
        })?;

    Ok(TimingRow {
        relative_day,
        action_type,
        record_type,
        record_id_template: non_empty(&fields[3]),
        associations_template,
        source_label: non_empty(&fields[5]),
        action_template,
        reason_template: non_empty(&fields[7]),
    })
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_json_field(field: &str) -> Result<Option<serde_json::Value>, String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| e.to_string())
}

/// Split one comma-delimited line, honoring double quotes.
fn split_quoted(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
