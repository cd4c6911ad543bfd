//! Tabular export of live events
//!
//! CSV with a fixed header; column order matches `Event`'s fields.

use std::io::{self, Write};

use chrono::SecondsFormat;

use super::event::Event;

/// Export header, in `Event` field order
pub const EXPORT_COLUMNS: [&str; 8] = [
    "id",
    "token_id",
    "uid",
    "stage",
    "timestamp",
    "device_id",
    "session_id",
    "is_manual",
];

/// Write `events` as CSV, header first.
pub fn write_csv<'a, W, I>(writer: &mut W, events: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a Event>,
{
    writeln!(writer, "{}", EXPORT_COLUMNS.join(","))?;
    let mut rows = 0;
    for event in events {
        let id = event.id.to_string();
        let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let fields: [&str; 8] = [
            id.as_str(),
            event.token_id.as_str(),
            event.uid.as_str(),
            event.stage.as_str(),
            timestamp.as_str(),
            event.device_id.as_str(),
            event.session_id.as_str(),
            if event.is_manual { "true" } else { "false" },
        ];
        let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
        writeln!(writer, "{}", line.join(","))?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
