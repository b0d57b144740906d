// src/template.rs
//! Brace-style string templates used by `$format`
//!
//! Two mutually exclusive modes:
//! - positional: `{}` takes the next argument, `{N}` / `{N.path}` index the
//!   argument list explicitly (the two styles cannot be mixed)
//! - named: `{path}` resolves a dotted path against one document
//!
//! `{{` and `}}` render literal braces. Missing values render as "".

use crate::error::{EngineError, Result};
use crate::value::Value;
use crate::value_utils::get_nested_value;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    /// `{}`
    Next,
    /// `{N}` or `{N.path}`
    Index(usize, String),
    /// `{path}`
    Name(String),
}

fn parse(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(ch) = rest.chars().next() {
        match ch {
            '{' if rest.starts_with("{{") => {
                text.push('{');
                rest = &rest[2..];
            }
            '}' if rest.starts_with("}}") => {
                text.push('}');
                rest = &rest[2..];
            }
            '{' => match rest[1..].find('}') {
                Some(end) => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(placeholder(&rest[1..1 + end]));
                    rest = &rest[end + 2..];
                }
                None => {
                    text.push_str(rest);
                    rest = "";
                }
            },
            _ => {
                text.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}

fn placeholder(key: &str) -> Segment {
    if key.is_empty() {
        return Segment::Next;
    }
    let (head, path) = key.split_once('.').unwrap_or((key, ""));
    match head.parse::<usize>() {
        Ok(index) if head.bytes().all(|b| b.is_ascii_digit()) => {
            Segment::Index(index, path.to_string())
        }
        _ => Segment::Name(key.to_string()),
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Undefined) | Some(Value::Null) => String::new(),
        Some(v) => v.to_display_string(),
    }
}

/// Interpolate positional arguments
///
/// ```
/// use ironagg_core::template::format_positional;
/// use ironagg_core::value::Value;
///
/// let out = format_positional("{} + {} = {}", &[1.into(), 2.into(), 3.into()]).unwrap();
/// assert_eq!(out, "1 + 2 = 3");
/// ```
pub fn format_positional(template: &str, args: &[Value]) -> Result<String> {
    let segments = parse(template);
    let implicit = segments.iter().any(|s| matches!(s, Segment::Next));
    let explicit = segments.iter().any(|s| matches!(s, Segment::Index(..)));
    if implicit && explicit {
        return Err(EngineError::InvalidTemplate(format!(
            "cannot mix implicit and explicit numbering in {:?}",
            template
        )));
    }

    let mut out = String::with_capacity(template.len());
    let mut next = 0;
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(&text),
            Segment::Next => {
                out.push_str(&render(args.get(next)));
                next += 1;
            }
            Segment::Index(index, path) => {
                let value = args.get(index).and_then(|arg| get_nested_value(arg, &path));
                out.push_str(&render(value));
            }
            Segment::Name(name) => {
                return Err(EngineError::InvalidTemplate(format!(
                    "named placeholder {{{}}} used with positional arguments",
                    name
                )));
            }
        }
    }
    Ok(out)
}

/// Interpolate fields of a document
///
/// `{0}` and `{0.path}` address the document itself; other indexes are
/// missing.
pub fn format_named(template: &str, doc: &Value) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template) {
        match segment {
            Segment::Text(text) => out.push_str(&text),
            Segment::Next => {
                return Err(EngineError::InvalidTemplate(format!(
                    "{{}} placeholder requires positional arguments in {:?}",
                    template
                )));
            }
            Segment::Index(0, path) => out.push_str(&render(get_nested_value(doc, &path))),
            Segment::Index(..) => {}
            Segment::Name(path) => out.push_str(&render(get_nested_value(doc, &path))),
        }
    }
    Ok(out)
}
