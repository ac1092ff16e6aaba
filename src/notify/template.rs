use indexmap::IndexMap;
use thiserror::Error;

/// Placeholder name to value, in the order the fields were added.
pub type Fields<'a> = IndexMap<&'a str, &'a str>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template references {{{0}}} but no such field was supplied")]
    MissingField(String),
    #[error("unmatched brace at byte {position}")]
    Malformed { position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Field(&'a str),
}

fn push_literal<'a>(segments: &mut Vec<Segment<'a>>, text: &'a str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text));
    }
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        match bytes[idx] {
            b @ (b'{' | b'}') if bytes.get(idx + 1) == Some(&b) => {
                push_literal(&mut segments, &template[literal_start..idx + 1]);
                idx += 2;
                literal_start = idx;
            }
            b'{' => {
                push_literal(&mut segments, &template[literal_start..idx]);
                let rest = &template[idx + 1..];
                match rest.find(|c: char| c == '{' || c == '}') {
                    Some(end) if end > 0 && rest.as_bytes()[end] == b'}' => {
                        segments.push(Segment::Field(&rest[..end]));
                        idx += end + 2;
                        literal_start = idx;
                    }
                    _ => return Err(TemplateError::Malformed { position: idx }),
                }
            }
            b'}' => return Err(TemplateError::Malformed { position: idx }),
            _ => idx += 1,
        }
    }
    push_literal(&mut segments, &template[literal_start..]);

    Ok(segments)
}

/// Fills every `{name}` in `template` from `fields`. Fields the template does not use are
/// ignored.
pub fn render(template: &str, fields: &Fields) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Field(name) => out.push_str(
                fields
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingField(name.to_owned()))?,
            ),
        }
    }
    Ok(out)
}

/// Checks that a template only references placeholders from `names`.
pub fn check(template: &str, names: &[&str]) -> Result<(), TemplateError> {
    for segment in parse(template)? {
        if let Segment::Field(name) = segment {
            if !names.contains(&name) {
                return Err(TemplateError::MissingField(name.to_owned()));
            }
        }
    }
    Ok(())
}
