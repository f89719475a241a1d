//! Rendering of heudiconv output templates such as
//! `sub-{subject}/func/sub-{subject}_task-alice_run-{item:02d}_bold`.

use crate::error::{Error, Result};

/// Values available to a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateFields<'a> {
    /// Participant label.
    pub subject: &'a str,
    /// 1-based index of the series within its category.
    pub item: usize,
    /// 1-based position of the series in the scan session.
    pub seqitem: usize,
    /// Index within a group of files from one series.
    pub subindex: usize,
}

/// Format an integer with a `d`-style spec: `d`, `2d`, `02d`, or empty.
fn format_int(value: usize, spec: &str, field: &str) -> Result<String> {
    let digits = spec.strip_suffix('d').unwrap_or(spec);
    if digits.is_empty() {
        return Ok(value.to_string());
    }
    let (zero_pad, width) = match digits.strip_prefix('0') {
        Some(rest) if !rest.is_empty() => (true, rest),
        _ => (false, digits),
    };
    let width: usize = width.parse().map_err(|_| {
        Error::Configuration(format!("bad format spec '{spec}' for field '{field}'"))
    })?;
    Ok(if zero_pad {
        format!("{value:0width$}")
    } else {
        format!("{value:width$}")
    })
}

fn format_field(name: &str, spec: &str, fields: &TemplateFields<'_>) -> Result<String> {
    let number = match name {
        "subject" => {
            return match spec {
                "" | "s" => Ok(fields.subject.to_string()),
                _ => Err(Error::Configuration(format!(
                    "bad format spec '{spec}' for field 'subject'"
                ))),
            }
        }
        "item" => fields.item,
        "seqitem" => fields.seqitem,
        "subindex" => fields.subindex,
        _ => {
            return Err(Error::Configuration(format!(
                "unknown template field '{name}'"
            )))
        }
    };
    format_int(number, spec, name)
}

/// Substitute `{field}` / `{field:spec}` placeholders; `{{` and `}}` are
/// literal braces.
pub fn render(template: &str, fields: &TemplateFields<'_>) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut placeholder = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => placeholder.push(c),
                        None => {
                            return Err(Error::Configuration(format!(
                                "unclosed '{{' in template '{template}'"
                            )))
                        }
                    }
                }
                let (name, spec) = placeholder.split_once(':').unwrap_or((placeholder.as_str(), ""));
                out.push_str(&format_field(name, spec, fields)?);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(Error::Configuration(format!(
                    "single '}}' in template '{template}'"
                )))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
