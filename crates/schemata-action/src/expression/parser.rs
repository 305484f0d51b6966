//! Tokenizer for attribute templates.
//!
//! A template is classified once by its leading control code and, in
//! substitution mode, split into literal text and `$` references.

/// One step of a context path: a key, optionally indexing into an array
/// stored under that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub key: String,
    pub index: Option<usize>,
}

impl PathStep {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            index: None,
        }
    }

    pub fn indexed(key: impl Into<String>, index: usize) -> Self {
        Self {
            key: key.into(),
            index: Some(index),
        }
    }
}

/// A piece of a substitution template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// A `$` reference. `source` is the matched text, kept for error
    /// messages.
    Reference { source: String, steps: Vec<PathStep> },
}

/// A classified template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Empty,
    /// Script body with the control code removed.
    Script(String),
    /// `~a.b.c` path lookup.
    Path(Vec<String>),
    Template(Vec<Segment>),
}

/// The name an empty leading path segment stands for.
pub const SUBJECT: &str = "subject";

/// Classify a template by its control code, in priority order.
pub fn parse(template: &str) -> Expression {
    if template.is_empty() {
        return Expression::Empty;
    }
    if let Some(script) = template.strip_prefix('!') {
        return Expression::Script(script.to_string());
    }
    if template.len() > 3 && template.starts_with("{{") && template.ends_with("}}") {
        return Expression::Script(template[2..template.len() - 2].to_string());
    }
    if template.len() > 3 {
        if let Some(script) = template.strip_prefix("js:") {
            return Expression::Script(script.to_string());
        }
    }
    if let Some(path) = template.strip_prefix('~') {
        let mut parts: Vec<String> = path.split('.').map(str::to_string).collect();
        if parts[0].is_empty() {
            parts[0] = SUBJECT.to_string();
        }
        return Expression::Path(parts);
    }
    Expression::Template(tokenize(template))
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split substitution text into literals and references.
pub fn tokenize(template: &str) -> Vec<Segment> {
    let chars: Vec<char> = template.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut pos = 0;

    while pos < chars.len() {
        if chars[pos] == '$' {
            if let Some((steps, end)) = scan_reference(&chars, pos + 1) {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Reference {
                    source: chars[pos..end].iter().collect(),
                    steps,
                });
                pos = end;
                continue;
            }
        }
        literal.push(chars[pos]);
        pos += 1;
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Scan `name[idx]?(.seg[idx]?)*` starting right after a `$`. Returns the
/// steps and the position one past the reference, or `None` when nothing
/// referenceable follows.
fn scan_reference(chars: &[char], start: usize) -> Option<(Vec<PathStep>, usize)> {
    let mut steps = Vec::new();
    let (first, mut pos) = scan_step(chars, start);

    match first {
        Some(step) => steps.push(step),
        None => {
            // `$.field` addresses the subject.
            if chars.get(start) == Some(&'.') && chars.get(start + 1).is_some_and(|c| is_word(*c)) {
                steps.push(PathStep::key(SUBJECT));
            } else {
                return None;
            }
        }
    }

    while chars.get(pos) == Some(&'.') && chars.get(pos + 1).is_some_and(|c| is_word(*c)) {
        let (step, next) = scan_step(chars, pos + 1);
        match step {
            Some(step) => steps.push(step),
            None => break,
        }
        pos = next;
    }
    Some((steps, pos))
}

fn scan_step(chars: &[char], start: usize) -> (Option<PathStep>, usize) {
    let mut pos = start;
    while chars.get(pos).is_some_and(|c| is_word(*c)) {
        pos += 1;
    }
    if pos == start {
        return (None, start);
    }
    let key: String = chars[start..pos].iter().collect();

    if chars.get(pos) == Some(&'[') {
        let digits_start = pos + 1;
        let mut end = digits_start;
        while chars.get(end).is_some_and(|c| c.is_ascii_digit()) {
            end += 1;
        }
        if end > digits_start && chars.get(end) == Some(&']') {
            let digits: String = chars[digits_start..end].iter().collect();
            if let Ok(index) = digits.parse::<usize>() {
                return (Some(PathStep::indexed(key, index)), end + 1);
            }
        }
    }
    (Some(PathStep::key(key)), pos)
}
