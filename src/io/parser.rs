//! Tolerant decoder for backend response text
//!
//! The engine's framing is not authoritative JSON. Observed payloads are a
//! bare number, a single JSON object, or several numeric arrays glued
//! together with no separator (`...][...`). Decoding is tiered; the first
//! tier that succeeds wins:
//! 1. the whole trimmed text as one number
//! 2. strict JSON, classified by shape (status / error / name+value /
//!    mapping / numeric array)
//! 3. glued-array splitting on `][` seams, each segment re-bracketed and
//!    parsed independently
//! 4. best-effort scalar scraping from segments that still fail
//!
//! The parser never panics; when no tier recovers anything it reports a
//! `ParseFailure` and the caller logs and skips the frame.

use crate::domain::types::{ResponseFrame, StatusKind};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no decodable payload in backend text")]
pub struct ParseFailure;

/// Decode one unit of raw backend text into a normalized frame.
pub fn parse(raw: &str) -> Result<ResponseFrame, ParseFailure> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ParseFailure);
    }

    // Tier 1: a single bare number
    if let Ok(value) = text.parse::<f64>() {
        return Ok(ResponseFrame::Numeric(value));
    }

    // Tier 2: strict JSON. Valid but unclassifiable JSON (a string, a mixed
    // array) is a failure rather than something to scrape numbers out of.
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return classify(value).ok_or(ParseFailure);
    }

    // Tiers 3+4: recover what we can from malformed text
    let values = recover_numbers(text);
    if values.is_empty() {
        Err(ParseFailure)
    } else {
        Ok(ResponseFrame::DataBatch(values))
    }
}

/// Map a strictly-parsed JSON value onto the closed frame set.
fn classify(value: Value) -> Option<ResponseFrame> {
    match value {
        Value::Object(map) => {
            if let Some(state) = map.get("status").and_then(Value::as_str).and_then(StatusKind::parse)
            {
                let message = map.get("message").and_then(Value::as_str).map(str::to_string);
                return Some(ResponseFrame::Status { state, message });
            }
            if let Some(err) = map.get("error") {
                let message = match err {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Some(ResponseFrame::Status {
                    state: StatusKind::Error,
                    message: Some(message),
                });
            }
            if map.contains_key("name") && map.contains_key("value") {
                let name = match &map["name"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Some(ResponseFrame::NamedVariable { name, value: map["value"].clone() });
            }
            Some(ResponseFrame::Dictionary(map))
        }
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in &items {
                values.push(item.as_f64()?);
            }
            Some(ResponseFrame::DataBatch(values))
        }
        Value::Number(n) => n.as_f64().map(ResponseFrame::Numeric),
        _ => None,
    }
}

/// Tier 3: split glued arrays, parse each segment, concatenate recovered
/// numbers in left-to-right order. Segments that still fail fall through to
/// tier 4 scalar scraping.
fn recover_numbers(text: &str) -> Vec<f64> {
    let mut values = Vec::new();
    for segment in split_glued_arrays(text) {
        match serde_json::from_str::<Value>(&segment) {
            Ok(Value::Array(items)) => {
                if items.iter().all(Value::is_number) {
                    values.extend(items.iter().filter_map(Value::as_f64));
                } else {
                    scrape_scalars(&segment, &mut values);
                }
            }
            _ => scrape_scalars(&segment, &mut values),
        }
    }
    values
}

/// Split text glued as `...][...` into independent bracketed segments,
/// restoring the bracket each side lost at the seam.
fn split_glued_arrays(text: &str) -> Vec<String> {
    if !text.contains("][") {
        return vec![text.to_string()];
    }

    let parts: Vec<&str> = text.split("][").collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let mut segment = String::with_capacity(part.len() + 2);
            if i > 0 {
                segment.push('[');
            }
            segment.push_str(part);
            if i < last {
                segment.push(']');
            }
            segment
        })
        .collect()
}

/// Tier 4: scan for runs of digits, `.` and `-`, flushing a candidate token
/// at every non-candidate character. Tokens that do not parse as a float are
/// discarded.
fn scrape_scalars(segment: &str, out: &mut Vec<f64>) {
    let mut token = String::new();
    for ch in segment.chars() {
        if ch.is_ascii_digit() || ch == '.' || ch == '-' {
            token.push(ch);
        } else {
            flush_token(&mut token, out);
        }
    }
    flush_token(&mut token, out);
}

fn flush_token(token: &mut String, out: &mut Vec<f64>) {
    if token.is_empty() {
        return;
    }
    if let Ok(value) = token.parse::<f64>() {
        out.push(value);
    }
    token.clear();
}
