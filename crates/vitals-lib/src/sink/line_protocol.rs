//! InfluxDB line protocol encoding
//!
//! `server_metrics,server=web-1 mem_percent=46i,disk_percent=79i,cpu_percent=0i 1700000000000000000`

use crate::models::{MetricPoint, SERVER_TAG};
use std::fmt::Write;

/// Encode one point as a single line, without the trailing newline
pub fn encode_point(point: &MetricPoint) -> String {
    let mut line = String::with_capacity(96);
    push_escaped(&mut line, point.measurement(), &[',', ' ']);

    // Empty tag values are not valid line protocol
    if !point.server.is_empty() {
        line.push(',');
        push_escaped(&mut line, SERVER_TAG, &[',', '=', ' ']);
        line.push('=');
        push_escaped(&mut line, &point.server, &[',', '=', ' ']);
    }

    let fields = &point.fields;
    let _ = write!(
        line,
        " mem_percent={}i,disk_percent={}i,cpu_percent={}i",
        fields.mem_percent, fields.disk_percent, fields.cpu_percent
    );

    // Out of range for nanoseconds: let the store stamp it on arrival
    if let Some(nanos) = point.timestamp.timestamp_nanos_opt() {
        let _ = write!(line, " {}", nanos);
    }

    line
}

/// Encode a batch as newline separated lines
pub fn encode_batch(points: &[MetricPoint]) -> String {
    let mut body = String::with_capacity(points.len() * 96);
    for point in points {
        body.push_str(&encode_point(point));
        body.push('\n');
    }
    body
}

/// Escape `special` plus backslashes and line breaks
///
/// A raw newline would split the point and a trailing backslash would escape
/// the separator after it; either makes the store reject the whole batch.
fn push_escaped(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}
