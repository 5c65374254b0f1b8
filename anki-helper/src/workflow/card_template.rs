//! `$VAR$` substitution for card templates
//!
//! The variable delimiter is the longest run of consecutive `$` in the text,
//! so literal dollar signs can be kept by using a longer delimiter:
//! `"$$FOO$$ $FOO$"` with `FOO=bar` renders as `"bar $FOO$"`. A text with a
//! dollar sign but no variable reference can use the implicit `EMPTY`
//! variable, which always expands to "".

use std::collections::BTreeMap;
use thiserror::Error;

/// Implicitly defined variable expanding to an empty string
pub const EMPTY_VAR: &str = "EMPTY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardTemplateError {
    #[error("no closing {delimiter:?} delimiter")]
    Unclosed { delimiter: String },

    #[error("variable {0:?} is not defined")]
    UndefinedVariable(String),

    #[error("malformed name {0:?}, expected a valid identifier")]
    InvalidName(String),
}

/// Substitute `$VAR$` references in `template`
pub fn substitute_variables(
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, CardTemplateError> {
    let delimiter_len = longest_run(template, '$');
    if delimiter_len == 0 {
        return Ok(template.to_string());
    }
    let delimiter = "$".repeat(delimiter_len);

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find(&delimiter) {
        let name_start = open + delimiter.len();
        let name_len = rest[name_start..]
            .find(&delimiter)
            .ok_or_else(|| CardTemplateError::Unclosed {
                delimiter: delimiter.clone(),
            })?;
        let name = &rest[name_start..name_start + name_len];

        let value = match vars.get(name) {
            Some(value) => value.as_str(),
            None if name == EMPTY_VAR => "",
            None => return Err(CardTemplateError::UndefinedVariable(name.to_string())),
        };

        out.push_str(&rest[..open]);
        out.push_str(value);
        rest = &rest[name_start + name_len + delimiter.len()..];
    }
    out.push_str(rest);

    Ok(out)
}

fn longest_run(text: &str, ch: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == ch {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}
