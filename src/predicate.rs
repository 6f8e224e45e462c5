//! Lexing, parsing and extraction for the predicate sub-language.
//!
//! The surface is deliberately small: a fixed set of field keywords
//! (`by`, `like`, `on`, `before`, `after`, `inRole`, `inGroup`,
//! `roleLevel`, `groupLevel`), each followed by `:` and a value. The
//! grammar lives in `predicate.pest`. Parsing never aborts on the first
//! problem; every stretch of unrecognizable input becomes its own error
//! in the caller-supplied [`MessageSet`], so a single malformed string
//! can report several independent errors in one pass.

use pest::Parser;
use pest_derive::Parser;

use crate::lower::MessageSet;

#[derive(Parser)]
#[grammar = "predicate.pest"]
struct PredicateParser;

// ------------- Field -------------
/// The fixed field keywords of the predicate sub-language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    By,
    Like,
    On,
    Before,
    After,
    InRole,
    InGroup,
    RoleLevel,
    GroupLevel,
}

impl Field {
    pub fn keyword(&self) -> &'static str {
        match self {
            Field::By => "by",
            Field::Like => "like",
            Field::On => "on",
            Field::Before => "before",
            Field::After => "after",
            Field::InRole => "inRole",
            Field::InGroup => "inGroup",
            Field::RoleLevel => "roleLevel",
            Field::GroupLevel => "groupLevel",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Field> {
        match keyword {
            "by" => Some(Field::By),
            "like" => Some(Field::Like),
            "on" => Some(Field::On),
            "before" => Some(Field::Before),
            "after" => Some(Field::After),
            "inRole" => Some(Field::InRole),
            "inGroup" => Some(Field::InGroup),
            "roleLevel" => Some(Field::RoleLevel),
            "groupLevel" => Some(Field::GroupLevel),
            _ => None,
        }
    }
}

// ------------- ClauseMap -------------
/// Ordered mapping from field to raw (already unescaped) value.
///
/// At most one value per field: a duplicate keyword overwrites the
/// earlier value in place, so the last occurrence wins.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClauseMap {
    entries: Vec<(Field, String)>,
}

impl ClauseMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }
    pub fn put(&mut self, field: Field, value: String) {
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((field, value)),
        }
    }
    pub fn get(&self, field: Field) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.entries.iter().map(|(f, v)| (*f, v.as_str()))
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Undo backslash escaping. A backslash makes the following character
/// literal; a trailing lone backslash is kept as-is. Pure and
/// independent of the grammar.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a predicate string into its field/value clauses.
///
/// Syntax problems are appended to `errors` with their character
/// offset; recognized clauses are still extracted, so callers get both
/// the partial mapping and the full set of errors from one walk.
pub fn parse_clauses(input: &str, errors: &mut MessageSet) -> ClauseMap {
    let mut clauses = ClauseMap::new();

    let parsed = match PredicateParser::parse(Rule::predicate, input) {
        Ok(mut pairs) => match pairs.next() {
            Some(predicate) => predicate,
            None => return clauses,
        },
        Err(e) => {
            let offset = match e.location {
                pest::error::InputLocation::Pos(pos) => pos,
                pest::error::InputLocation::Span((start, _)) => start,
            };
            errors.add_error(format!(
                "Parsing error at {}: {}",
                offset,
                e.variant.message()
            ));
            return clauses;
        }
    };

    for item in parsed.into_inner() {
        match item.as_rule() {
            Rule::clause => {
                let mut inner = item.into_inner();
                let (Some(field_pair), Some(value_pair)) = (inner.next(), inner.next()) else {
                    continue;
                };
                let Some(field) = Field::from_keyword(field_pair.as_str()) else {
                    continue;
                };
                let value = match value_pair.as_rule() {
                    Rule::quoted => {
                        let text = value_pair.as_str();
                        unescape(&text[1..text.len() - 1])
                    }
                    _ => value_pair.as_str().to_string(),
                };
                clauses.put(field, value);
            }
            Rule::garbage => {
                errors.add_error(format!(
                    "Parsing error at {}: unrecognized input \"{}\"",
                    item.as_span().start(),
                    item.as_str().trim()
                ));
            }
            Rule::EOI => (),
            _ => (),
        }
    }

    clauses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> ClauseMap {
        let mut errors = MessageSet::new();
        let clauses = parse_clauses(input, &mut errors);
        assert!(!errors.has_any_errors(), "unexpected errors: {errors}");
        clauses
    }

    #[test]
    fn quoted_and_bare_values() {
        let clauses = parse_ok("by: \"alice\" on: 2023-01-04");
        assert_eq!(clauses.get(Field::By), Some("alice"));
        assert_eq!(clauses.get(Field::On), Some("2023-01-04"));
    }

    #[test]
    fn escapes_round_trip() {
        let clauses = parse_ok(r#"like: "say \"hi\" \\ bye""#);
        assert_eq!(clauses.get(Field::Like), Some(r#"say "hi" \ bye"#));
    }

    #[test]
    fn duplicate_field_last_wins() {
        let clauses = parse_ok(r#"by: "first" by: "second""#);
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses.get(Field::By), Some("second"));
    }

    #[test]
    fn garbage_is_reported_with_offset_and_parsing_continues() {
        let mut errors = MessageSet::new();
        let clauses = parse_clauses(r#"bogus by: "alice" trailing"#, &mut errors);
        assert_eq!(clauses.get(Field::By), Some("alice"));
        assert_eq!(errors.messages().len(), 2);
        assert!(errors.messages()[0].starts_with("Parsing error at 0:"));
        assert!(errors.messages()[1].contains("trailing"));
    }

    #[test]
    fn unknown_keyword_is_an_error_not_a_field() {
        let mut errors = MessageSet::new();
        let clauses = parse_clauses(r#"since: "2023-01-01""#, &mut errors);
        assert!(clauses.is_empty());
        assert!(errors.has_any_errors());
    }

    #[test]
    fn empty_input_is_no_clauses_no_errors() {
        let clauses = parse_ok("   ");
        assert!(clauses.is_empty());
    }
}
