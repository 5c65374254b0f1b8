//! Script argument templates
//!
//! Arguments and stdin of note-processing scripts may embed actions between
//! `$$` delimiters. The only binding visible to an action is the current
//! note:
//!
//! | Action                           | Renders as                          |
//! |----------------------------------|-------------------------------------|
//! | `$$ .Note.Fields.Word $$`        | value of field `Word`               |
//! | `$$ index .Note.Fields "A B" $$` | value of field `A B`                |
//! | `$$ .Note.Tags $$`               | tags, sorted, joined by spaces      |
//! | `$$ json .Note $$`               | `{"Fields":{...},"Tags":[...]}`     |
//! | `$$ json .Note.Fields $$`        | JSON object of all fields           |
//! | `$$ json .Note.Tags $$`          | JSON array of tags                  |
//! | `$$ json .Note.Fields.Word $$`   | JSON string of one field            |
//!
//! Templates are compiled once when the configuration is loaded, so syntax
//! errors surface before any script runs. Referencing a field the note does
//! not have fails at render time.

use anki_helper_common::NoteData;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

/// Action delimiter; a string containing it is compiled as a template
pub const DELIMITER: &str = "$$";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("malformed template {template:?}: {reason}")]
    Syntax { template: String, reason: String },

    #[error("note has no field {0:?}")]
    MissingField(String),
}

/// Compiled argument template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Value(NotePath),
    Json(NotePath),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NotePath {
    Note,
    Fields,
    Tags,
    Field(String),
}

impl ArgTemplate {
    /// True when `text` has to be compiled as a template
    pub fn is_template(text: &str) -> bool {
        text.contains(DELIMITER)
    }

    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let syntax_error = |reason: String| TemplateError::Syntax {
            template: text.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find(DELIMITER) {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + DELIMITER.len()..];
            let close = after_open
                .find(DELIMITER)
                .ok_or_else(|| syntax_error("unclosed action".to_string()))?;
            segments.push(parse_action(after_open[..close].trim()).map_err(syntax_error)?);
            rest = &after_open[close + DELIMITER.len()..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    /// Template text as written in the configuration
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, note: &NoteData) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Value(NotePath::Field(name)) => out.push_str(field(note, name)?),
                Segment::Value(NotePath::Tags) => out.push_str(&join_tags(note)),
                // Rejected by the parser
                Segment::Value(NotePath::Note | NotePath::Fields) => {}
                Segment::Json(path) => out.push_str(&to_json(note, path)?),
            }
        }
        Ok(out)
    }
}

fn parse_action(body: &str) -> Result<Segment, String> {
    if body.is_empty() {
        return Err("empty action".to_string());
    }

    if let Some(path) = body.strip_prefix("json ") {
        return parse_path(path.trim()).map(Segment::Json);
    }

    match parse_path(body)? {
        path @ (NotePath::Field(_) | NotePath::Tags) => Ok(Segment::Value(path)),
        _ => Err(format!("{:?} cannot be printed directly, use \"json {}\"", body, body)),
    }
}

fn parse_path(expr: &str) -> Result<NotePath, String> {
    match expr {
        ".Note" => return Ok(NotePath::Note),
        ".Note.Fields" => return Ok(NotePath::Fields),
        ".Note.Tags" => return Ok(NotePath::Tags),
        _ => {}
    }

    if let Some(name) = expr.strip_prefix(".Note.Fields.") {
        if is_identifier(name) {
            return Ok(NotePath::Field(name.to_string()));
        }
        return Err(format!(
            "{:?} is not a valid field identifier, use index .Note.Fields \"{}\"",
            name, name
        ));
    }

    if let Some(args) = expr.strip_prefix("index ") {
        let key = args
            .trim_start()
            .strip_prefix(".Note.Fields")
            .ok_or_else(|| format!("index is only supported on .Note.Fields, got {:?}", expr))?;
        return parse_string_literal(key.trim()).map(NotePath::Field);
    }

    Err(format!("unsupported action {:?}", expr))
}

/// Double-quoted (with escapes) or backquoted string literal
fn parse_string_literal(literal: &str) -> Result<String, String> {
    if let Some(raw) = literal
        .strip_prefix('`')
        .and_then(|rest| rest.strip_suffix('`'))
    {
        if !raw.contains('`') {
            return Ok(raw.to_string());
        }
    }
    if literal.starts_with('"') {
        return serde_json::from_str::<String>(literal)
            .map_err(|e| format!("malformed string literal {}: {}", literal, e));
    }
    Err(format!("expected a quoted field name, got {:?}", literal))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn field<'a>(note: &'a NoteData, name: &str) -> Result<&'a str, TemplateError> {
    note.field(name)
        .ok_or_else(|| TemplateError::MissingField(name.to_string()))
}

fn join_tags(note: &NoteData) -> String {
    note.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn to_json(note: &NoteData, path: &NotePath) -> Result<String, TemplateError> {
    let sorted_fields = || note.fields.iter().collect::<BTreeMap<_, _>>();
    let value = match path {
        NotePath::Note => json!({ "Fields": sorted_fields(), "Tags": note.tags }),
        NotePath::Fields => json!(sorted_fields()),
        NotePath::Tags => json!(note.tags),
        NotePath::Field(name) => json!(field(note, name)?),
    };
    Ok(value.to_string())
}
