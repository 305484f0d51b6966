//! Input validation rules and string conformations.
//!
//! Both take comma-separated tag lists such as `"required,email"` or
//! `"trim,lower"`. Parameterised tags use `name=param`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use schemata_core::types::FieldRule;

use crate::error::ActionError;
use crate::store::display_value;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex"));

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+\S*$").expect("Invalid url regex")
});

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?[0-9]+(\.[0-9]+)?$").expect("Invalid numeric regex"));

fn split_tags(tags: &str) -> impl Iterator<Item = &str> {
    tags.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

// ---- validation ----

/// Apply every rule to the matching attribute. The first violation wins.
pub fn validate(rules: &[FieldRule], attributes: &Map<String, Value>) -> Result<(), ActionError> {
    for rule in rules {
        validate_field(&rule.field, attributes.get(&rule.field), &rule.tags)?;
    }
    Ok(())
}

/// Check one value against its tag list. Absent values only fail
/// `required`.
pub fn validate_field(field: &str, value: Option<&Value>, tags: &str) -> Result<(), ActionError> {
    for tag in split_tags(tags) {
        let (name, param) = match tag.split_once('=') {
            Some((name, param)) => (name, Some(param)),
            None => (tag, None),
        };

        if name == "omitempty" {
            if is_empty(value) {
                return Ok(());
            }
            continue;
        }
        if name == "required" {
            if is_empty(value) {
                return Err(violation(field, tag));
            }
            continue;
        }

        let value = match value {
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };
        if !check(name, param, value) {
            return Err(violation(field, tag));
        }
    }
    Ok(())
}

fn violation(field: &str, tag: &str) -> ActionError {
    ActionError::InvalidFieldValue {
        field: field.to_string(),
        rule: tag.to_string(),
    }
}

fn check(name: &str, param: Option<&str>, value: &Value) -> bool {
    let text = display_value(value);
    match name {
        "email" => EMAIL_RE.is_match(&text),
        "url" => URL_RE.is_match(&text),
        "alpha" => !text.is_empty() && text.chars().all(|c| c.is_alphabetic()),
        "alphanum" => !text.is_empty() && text.chars().all(|c| c.is_alphanumeric()),
        "numeric" => NUMERIC_RE.is_match(&text),
        "number" => !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()),
        "uuid" => uuid::Uuid::parse_str(&text).is_ok(),
        "datetime" => chrono::DateTime::parse_from_rfc3339(&text).is_ok(),
        "min" | "max" | "len" => {
            let limit = param.and_then(|p| p.parse::<f64>().ok());
            let (Some(limit), Some(size)) = (limit, measure(value)) else {
                return false;
            };
            match name {
                "min" => size >= limit,
                "max" => size <= limit,
                _ => size == limit,
            }
        }
        "eq" => param.is_some_and(|p| text == p),
        "ne" => param.is_some_and(|p| text != p),
        "oneof" => param.is_some_and(|p| p.split_whitespace().any(|option| option == text)),
        "contains" => param.is_some_and(|p| text.contains(p)),
        "startswith" => param.is_some_and(|p| text.starts_with(p)),
        "endswith" => param.is_some_and(|p| text.ends_with(p)),
        _ => false,
    }
}

/// Size used by `min`/`max`/`len`: characters, elements or the number itself.
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// ---- conformation ----

/// Apply each rule's transforms in place. Non-string and absent values are
/// left alone.
pub fn conform_all(rules: &[FieldRule], attributes: &mut Map<String, Value>) {
    for rule in rules {
        if let Some(Value::String(text)) = attributes.get_mut(&rule.field) {
            *text = conform(text, &rule.tags);
        }
    }
}

/// Run the transforms of `tags` left to right over `input`.
pub fn conform(input: &str, tags: &str) -> String {
    let mut out = input.to_string();
    for tag in split_tags(tags) {
        out = match tag {
            "trim" => out.trim().to_string(),
            "ltrim" => out.trim_start().to_string(),
            "rtrim" => out.trim_end().to_string(),
            "lower" => out.to_lowercase(),
            "upper" => out.to_uppercase(),
            "title" => title_case(&out),
            "ucfirst" => upper_first(&out),
            "snake" => snake_case(&out),
            "camel" => camel_case(&out),
            "email" => out.trim().to_lowercase(),
            "num" => out.chars().filter(|c| c.is_ascii_digit()).collect(),
            "!num" => out.chars().filter(|c| !c.is_ascii_digit()).collect(),
            "alpha" => out.chars().filter(|c| c.is_alphabetic()).collect(),
            "!alpha" => out.chars().filter(|c| !c.is_alphabetic()).collect(),
            "name" => title_case(&out.split_whitespace().collect::<Vec<_>>().join(" ")),
            unknown => {
                debug!(transform = unknown, "ignoring unknown transform");
                out
            }
        };
    }
    out
}

fn upper_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Split on separators and lower-to-upper case boundaries.
fn words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn snake_case(text: &str) -> String {
    words(text)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

fn camel_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, word) in words(text).iter().enumerate() {
        if i == 0 {
            out.push_str(&word.to_lowercase());
        } else {
            out.push_str(&capitalize(word));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_for(value: Value, tags: &str) -> Result<(), ActionError> {
        validate_field("f", Some(&value), tags)
    }

    fn failed_rule(result: Result<(), ActionError>) -> String {
        match result {
            Err(ActionError::InvalidFieldValue { rule, .. }) => rule,
            other => panic!("expected violation, got {other:?}"),
        }
    }

    // ---- validation ----

    #[test]
    fn test_required() {
        assert!(validate_field("f", None, "required").is_err());
        assert!(validate_field("f", Some(&json!(null)), "required").is_err());
        assert!(validate_field("f", Some(&json!("")), "required").is_err());
        assert!(rule_for(json!("x"), "required").is_ok());
        assert!(rule_for(json!(0), "required").is_ok());
    }

    #[test]
    fn test_absent_values_skip_other_rules() {
        assert!(validate_field("f", None, "email,min=3").is_ok());
    }

    #[test]
    fn test_omitempty_stops_checks() {
        assert!(rule_for(json!(""), "omitempty,email").is_ok());
        assert_eq!(failed_rule(rule_for(json!("nope"), "omitempty,email")), "email");
    }

    #[test]
    fn test_email_and_url() {
        assert!(rule_for(json!("ada@example.com"), "email").is_ok());
        assert!(rule_for(json!("ada@example"), "email").is_err());
        assert!(rule_for(json!("https://example.com/path?q=1"), "url").is_ok());
        assert!(rule_for(json!("example.com"), "url").is_err());
    }

    #[test]
    fn test_patterns_compile() {
        assert!(EMAIL_RE.is_match("a@b.co"));
        assert!(URL_RE.is_match("ftp://host"));
        assert!(NUMERIC_RE.is_match("-12.5"));
        assert!(!NUMERIC_RE.is_match("12."));
    }

    #[test]
    fn test_character_classes() {
        assert!(rule_for(json!("abc"), "alpha").is_ok());
        assert!(rule_for(json!("abc1"), "alpha").is_err());
        assert!(rule_for(json!("abc1"), "alphanum").is_ok());
        assert!(rule_for(json!("-12.5"), "numeric").is_ok());
        assert!(rule_for(json!(42), "numeric").is_ok());
        assert!(rule_for(json!("12a"), "numeric").is_err());
        assert!(rule_for(json!("123"), "number").is_ok());
        assert!(rule_for(json!("-1"), "number").is_err());
    }

    #[test]
    fn test_uuid_and_datetime() {
        assert!(rule_for(json!("67e55044-10b1-426f-9247-bb680e5fe0c8"), "uuid").is_ok());
        assert!(rule_for(json!("not-a-uuid"), "uuid").is_err());
        assert!(rule_for(json!("2024-05-01T10:00:00Z"), "datetime").is_ok());
        assert!(rule_for(json!("yesterday"), "datetime").is_err());
    }

    #[test]
    fn test_size_rules() {
        assert!(rule_for(json!("abcd"), "min=3,max=5").is_ok());
        assert_eq!(failed_rule(rule_for(json!("ab"), "min=3")), "min=3");
        assert_eq!(failed_rule(rule_for(json!(10), "max=5")), "max=5");
        assert!(rule_for(json!([1, 2]), "len=2").is_ok());
        assert!(rule_for(json!(true), "min=1").is_err());
        assert!(rule_for(json!("abc"), "min=x").is_err());
    }

    #[test]
    fn test_comparison_rules() {
        assert!(rule_for(json!("a"), "eq=a").is_ok());
        assert!(rule_for(json!("a"), "ne=a").is_err());
        assert!(rule_for(json!("green"), "oneof=red green blue").is_ok());
        assert!(rule_for(json!("pink"), "oneof=red green blue").is_err());
        assert!(rule_for(json!("foobar"), "contains=oba,startswith=foo,endswith=bar").is_ok());
    }

    #[test]
    fn test_unknown_rule_is_violation() {
        assert_eq!(failed_rule(rule_for(json!("x"), "shiny")), "shiny");
    }

    #[test]
    fn test_validate_first_violation_wins() {
        let rules = vec![
            FieldRule::new("email", "required,email"),
            FieldRule::new("name", "required"),
        ];
        let attrs = match json!({"email": "bad"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        match validate(&rules, &attrs) {
            Err(ActionError::InvalidFieldValue { field, rule }) => {
                assert_eq!(field, "email");
                assert_eq!(rule, "email");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    // ---- conformation ----

    #[test]
    fn test_conform_basic_transforms() {
        assert_eq!(conform("  Hi  ", "trim"), "Hi");
        assert_eq!(conform("  Hi  ", "ltrim"), "Hi  ");
        assert_eq!(conform("  Hi  ", "rtrim"), "  Hi");
        assert_eq!(conform("Hi", "lower"), "hi");
        assert_eq!(conform("Hi", "upper"), "HI");
        assert_eq!(conform("hello wORLD", "title"), "Hello World");
        assert_eq!(conform("hello world", "ucfirst"), "Hello world");
    }

    #[test]
    fn test_conform_case_styles() {
        assert_eq!(conform("HelloWorld foo-bar", "snake"), "hello_world_foo_bar");
        assert_eq!(conform("hello world_again", "camel"), "helloWorldAgain");
    }

    #[test]
    fn test_conform_character_filters() {
        assert_eq!(conform("  Ada@Example.COM ", "email"), "ada@example.com");
        assert_eq!(conform("+1 (555) 010", "num"), "1555010");
        assert_eq!(conform("a1b2", "!num"), "ab");
        assert_eq!(conform("a1b2", "alpha"), "ab");
        assert_eq!(conform("a1b2", "!alpha"), "12");
        assert_eq!(conform("  ada   LOVELACE ", "name"), "Ada Lovelace");
    }

    #[test]
    fn test_conform_chain_and_unknown() {
        assert_eq!(conform("  MiXed ", "trim,lower,sparkle"), "mixed");
    }

    #[test]
    fn test_conform_all_only_touches_strings() {
        let rules = vec![
            FieldRule::new("email", "email"),
            FieldRule::new("age", "trim"),
            FieldRule::new("missing", "trim"),
        ];
        let mut attrs = match json!({"email": " A@B.CO ", "age": 3}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        conform_all(&rules, &mut attrs);
        assert_eq!(attrs.get("email"), Some(&json!("a@b.co")));
        assert_eq!(attrs.get("age"), Some(&json!(3)));
        assert!(!attrs.contains_key("missing"));
    }
}
