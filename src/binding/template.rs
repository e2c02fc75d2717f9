//! `${key}` / `${key:default}` placeholder templates.

use crate::BindingError;

enum Part<'a> {
    Literal(&'a str),
    Placeholder { key: &'a str, default: Option<&'a str> },
}

fn parse(template: &str) -> Result<Vec<Part<'_>>, BindingError> {
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            parts.push(Part::Literal(&rest[..start]));
        }
        let body = &rest[start + 2..];
        let end = body
            .find('}')
            .ok_or_else(|| BindingError::MalformedTemplate(template.to_string()))?;
        let inner = &body[..end];
        let (key, default) = match inner.split_once(':') {
            Some((key, default)) => (key.trim(), Some(default)),
            None => (inner.trim(), None),
        };
        if key.is_empty() {
            return Err(BindingError::MalformedTemplate(template.to_string()));
        }
        parts.push(Part::Placeholder { key, default });
        rest = &body[end + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest));
    }
    Ok(parts)
}

/// Keys referenced by the template, in order of appearance, without duplicates.
pub fn placeholder_keys(template: &str) -> Result<Vec<String>, BindingError> {
    let mut keys: Vec<String> = Vec::new();
    for part in parse(template)? {
        if let Part::Placeholder { key, .. } = part {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
    }
    Ok(keys)
}

/// Renders the template, resolving each placeholder through `lookup`.
pub fn render(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, BindingError> {
    let mut out = String::with_capacity(template.len());
    for part in parse(template)? {
        match part {
            Part::Literal(text) => out.push_str(text),
            Part::Placeholder { key, default } => match lookup(key) {
                Some(value) => out.push_str(&value),
                None => match default {
                    Some(default) => out.push_str(default),
                    None => return Err(BindingError::UnresolvablePlaceholder(key.to_string())),
                },
            },
        }
    }
    Ok(out)
}
