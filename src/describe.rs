//! Human-readable labels for picker rows.
//!
//! The description template takes positional placeholders (`{}` or `{N}`)
//! filled from the configured description fields in order. A placeholder may
//! carry a `!s` conversion and a string format spec such as `{0:>10}` or
//! `{:.20}`, the subset of `str.format` that makes sense for text. The source field
//! is always bracketed by the wrap characters: in place when it is one of the
//! description fields, otherwise appended once after the rendered template.

use crate::config::WrapChars;
use crate::error::{CitationError, Result};
use crate::models::Record;

/// Source fields that are never appended to the description.
const UNWRAPPED_SOURCE_FIELDS: &[&str] = &["combined", "file"];

/// Render the description of `record`.
pub fn describe(
    record: &Record,
    source_field: &str,
    desc_fields: &[String],
    template: &str,
    wrap: &WrapChars,
) -> Result<String> {
    let mut values = desc_fields
        .iter()
        .map(|name| {
            record
                .field(name)
                .ok_or_else(|| CitationError::UnknownField(name.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut appended = String::new();
    if let Some(index) = desc_fields.iter().position(|name| name == source_field) {
        values[index] = wrap.wrap(&values[index]);
    } else if !UNWRAPPED_SOURCE_FIELDS.contains(&source_field) {
        let value = record
            .field(source_field)
            .ok_or_else(|| CitationError::UnknownField(source_field.to_string()))?;
        appended = wrap.wrap(&value);
    }

    let mut description = format_positional(template, &values)?;
    description.push_str(&appended);
    Ok(description)
}

/// Fill `{}`/`{N}` placeholders from `args`; `{{` and `}}` are literal braces.
/// Any malformed template is a configuration error that quotes the template.
pub fn format_positional(template: &str, args: &[String]) -> Result<String> {
    let template_error = |reason: &str| {
        CitationError::Configuration(format!("description format \"{template}\": {reason}"))
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_auto = 0usize;
    let mut used_auto = false;
    let mut used_manual = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(template_error("single '}' encountered")),
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => spec.push(ch),
                        None => return Err(template_error("unclosed '{'")),
                    }
                }

                let (name, conversion, format_spec) = split_placeholder(&spec);
                let invalid = || template_error(&format!("invalid placeholder {{{spec}}}"));
                if !matches!(conversion, None | Some("s")) {
                    return Err(invalid());
                }

                let index = if name.is_empty() {
                    used_auto = true;
                    next_auto += 1;
                    next_auto - 1
                } else {
                    used_manual = true;
                    name.parse::<usize>().map_err(|_| invalid())?
                };
                if used_auto && used_manual {
                    return Err(template_error(
                        "cannot mix automatic and manual field numbering",
                    ));
                }

                let value = args.get(index).ok_or_else(|| {
                    template_error(&format!(
                        "placeholder {index} but only {} description fields",
                        args.len()
                    ))
                })?;
                let value = match format_spec {
                    Some(format_spec) => apply_format_spec(value, format_spec).ok_or_else(invalid)?,
                    None => value.clone(),
                };
                out.push_str(&value);
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Split `name!conversion:format_spec` into its parts.
fn split_placeholder(spec: &str) -> (&str, Option<&str>, Option<&str>) {
    let (head, format_spec) = match spec.split_once(':') {
        Some((head, format_spec)) => (head, Some(format_spec)),
        None => (spec, None),
    };
    let (name, conversion) = match head.split_once('!') {
        Some((name, conversion)) => (name, Some(conversion)),
        None => (head, None),
    };
    (name.trim(), conversion, format_spec)
}

/// Apply a string format spec, `[[fill]align][width][.precision][s]`.
/// Returns `None` for anything a string cannot be formatted with.
fn apply_format_spec(value: &str, format_spec: &str) -> Option<String> {
    let chars: Vec<char> = format_spec.chars().collect();
    let is_align = |c: &char| matches!(c, '<' | '>' | '^');
    let mut pos = 0;
    let (fill, align) = match chars.as_slice() {
        [fill, align, ..] if is_align(align) => {
            pos = 2;
            (*fill, *align)
        }
        [align, ..] if is_align(align) => {
            pos = 1;
            (' ', *align)
        }
        _ => (' ', '<'),
    };

    let digits = |pos: &mut usize| -> Option<usize> {
        let start = *pos;
        while chars.get(*pos).is_some_and(char::is_ascii_digit) {
            *pos += 1;
        }
        chars[start..*pos].iter().collect::<String>().parse().ok()
    };
    let width = digits(&mut pos).unwrap_or(0);
    let precision = if chars.get(pos) == Some(&'.') {
        pos += 1;
        Some(digits(&mut pos)?)
    } else {
        None
    };
    if chars.get(pos) == Some(&'s') {
        pos += 1;
    }
    if pos != chars.len() {
        return None;
    }

    let text: String = match precision {
        Some(precision) => value.chars().take(precision).collect(),
        None => value.to_string(),
    };
    let padding = width.saturating_sub(text.chars().count());
    let (left, right) = match align {
        '>' => (padding, 0),
        '^' => (padding / 2, padding - padding / 2),
        _ => (0, padding),
    };
    let fill = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Some(format!("{}{text}{}", fill(left), fill(right)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_format_spec_truncates_and_pads() {
        assert_eq!(apply_format_spec("Quantum", "-^9.3").as_deref(), Some("---Qua---"));
        assert_eq!(apply_format_spec("é", ">3").as_deref(), Some("  é"));
        assert_eq!(apply_format_spec("x", "+d"), None);
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn smith() -> Record {
        let mut record = Record::new("Smith2020");
        record.set("type", "article");
        record.set("title", "On X");
        record.set("author", "Doe");
        record.file = "/papers/x.pdf".to_string();
        record
    }

    #[test]
    fn test_source_field_bracketed_in_place() {
        let description = describe(
            &smith(),
            "key",
            &fields(&["type", "key", "title"]),
            "{} {} {}",
            &WrapChars::new("[", "]"),
        )
        .unwrap();
        assert_eq!(description, "article [Smith2020] On X");
    }

    #[test]
    fn test_source_field_appended_when_not_described() {
        let description = describe(
            &smith(),
            "author",
            &fields(&["type", "title"]),
            "{}: {} ",
            &WrapChars::new("(", ")"),
        )
        .unwrap();
        assert_eq!(description, "article: On X (Doe)");
        assert_eq!(description.matches("(Doe)").count(), 1);
    }

    #[rstest]
    #[case("file")]
    #[case("combined")]
    fn test_pseudo_source_fields_are_not_appended(#[case] source: &str) {
        let description = describe(
            &smith(),
            source,
            &fields(&["title"]),
            "{}",
            &WrapChars::default(),
        )
        .unwrap();
        assert_eq!(description, "On X");
    }

    #[test]
    fn test_pseudo_source_field_in_description_is_still_bracketed() {
        let description = describe(
            &smith(),
            "file",
            &fields(&["title", "file"]),
            "{} {}",
            &WrapChars::default(),
        )
        .unwrap();
        assert_eq!(description, "On X [/papers/x.pdf]");
    }

    #[test]
    fn test_unknown_description_field_names_it() {
        let err = describe(
            &smith(),
            "key",
            &fields(&["title", "shoesize"]),
            "{} {}",
            &WrapChars::default(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, CitationError::UnknownField(ref f) if f == "shoesize"));
    }

    #[test]
    fn test_unknown_source_field_is_configuration_error() {
        let err = describe(
            &smith(),
            "shoesize",
            &fields(&["title"]),
            "{}",
            &WrapChars::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CitationError::UnknownField(ref f) if f == "shoesize"));
    }

    #[test]
    fn test_default_template() {
        let description = describe(
            &smith(),
            "key",
            &fields(&["type", "key", "title", "author", "date"]),
            "{}∶ {} \"{}\" -{}- ({})",
            &WrapChars::default(),
        )
        .unwrap();
        assert_eq!(description, "article∶ [Smith2020] \"On X\" -Doe- ()");
    }

    #[rstest]
    #[case("{} and {}", "a and b")]
    #[case("{1} then {0}", "b then a")]
    #[case("{0}{0}", "aa")]
    #[case("{{{}}}", "{a}")]
    #[case("no placeholders", "no placeholders")]
    #[case("{0:>4}|{1:<3}|", "   a|b  |")]
    #[case("{:*^5}{!s}", "**a**b")]
    #[case("{0:.2s}", "a")]
    #[case("{1!s:_>3}", "__b")]
    fn test_format_positional(#[case] template: &str, #[case] expected: &str) {
        let args = fields(&["a", "b"]);
        assert_eq!(format_positional(template, &args).unwrap(), expected);
    }

    #[rstest]
    #[case("{} {} {}")]
    #[case("{2}")]
    #[case("{} {1}")]
    #[case("{name}")]
    #[case("open {")]
    #[case("stray }")]
    #[case("{!r}")]
    #[case("{:d}")]
    #[case("{:.}")]
    fn test_format_positional_errors(#[case] template: &str) {
        let args = fields(&["a", "b"]);
        let err = format_positional(template, &args).unwrap_err();
        assert!(err.is_configuration(), "{template}");
    }
}
