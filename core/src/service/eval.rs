//! Row evaluation for the in-memory table service: filters, ordering and
//! column projection over JSON records.

use super::{ErrorCode, ServiceError, ServiceResult};
use crate::query::{Filter, Sort, TextSearchKind};
use crate::schema::Record;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;

/// A filter with its patterns compiled.
pub(super) enum Predicate {
    Compare {
        column: String,
        value: Value,
        accept: fn(Ordering) -> bool,
        negate_on_missing: bool,
    },
    Pattern {
        column: String,
        regex: Regex,
    },
    Is {
        column: String,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    TextSearch {
        column: String,
        query: TextQuery,
    },
    Not(Box<Predicate>),
    Or(Vec<Predicate>),
}

fn comparison(column: &str, value: &Value, accept: fn(Ordering) -> bool) -> Predicate {
    Predicate::Compare {
        column: column.to_string(),
        value: value.clone(),
        accept,
        negate_on_missing: false,
    }
}

pub(super) fn compile(filter: &Filter) -> ServiceResult<Predicate> {
    Ok(match filter {
        Filter::Eq { column, value } => comparison(column, value, |o| o == Ordering::Equal),
        Filter::Neq { column, value } => Predicate::Compare {
            column: column.clone(),
            value: value.clone(),
            accept: |o| o != Ordering::Equal,
            negate_on_missing: true,
        },
        Filter::Gt { column, value } => comparison(column, value, |o| o == Ordering::Greater),
        Filter::Gte { column, value } => comparison(column, value, |o| o != Ordering::Less),
        Filter::Lt { column, value } => comparison(column, value, |o| o == Ordering::Less),
        Filter::Lte { column, value } => comparison(column, value, |o| o != Ordering::Greater),
        Filter::Like { column, pattern } => Predicate::Pattern {
            column: column.clone(),
            regex: like_to_regex(pattern, false)?,
        },
        Filter::ILike { column, pattern } => Predicate::Pattern {
            column: column.clone(),
            regex: like_to_regex(pattern, true)?,
        },
        Filter::Is { column, value } => {
            if !matches!(value, Value::Null | Value::Bool(_)) {
                return Err(ServiceError::new(
                    ErrorCode::InvalidRequest,
                    format!("IS filter on '{}' expects null or a boolean", column),
                ));
            }
            Predicate::Is {
                column: column.clone(),
                value: value.clone(),
            }
        }
        Filter::In { column, values } => Predicate::In {
            column: column.clone(),
            values: values.clone(),
        },
        Filter::TextSearch {
            column,
            query,
            config: _,
            kind,
        } => Predicate::TextSearch {
            column: column.clone(),
            query: TextQuery::parse(query, *kind),
        },
        Filter::Not { filter } => Predicate::Not(Box::new(compile(filter)?)),
        Filter::Or { filters } => {
            Predicate::Or(filters.iter().map(compile).collect::<ServiceResult<_>>()?)
        }
    })
}

impl Predicate {
    pub(super) fn matches(&self, row: &Record) -> bool {
        match self {
            Predicate::Compare {
                column,
                value,
                accept,
                negate_on_missing,
            } => match row.get(column) {
                Some(actual) if !actual.is_null() => match compare_values(actual, value) {
                    Some(ordering) => accept(ordering),
                    None => *negate_on_missing,
                },
                _ => false,
            },
            Predicate::Pattern { column, regex } => match row.get(column) {
                Some(Value::String(s)) => regex.is_match(s),
                Some(Value::Number(n)) => regex.is_match(&n.to_string()),
                _ => false,
            },
            Predicate::Is { column, value } => match value {
                Value::Null => row.get(column).is_none_or(Value::is_null),
                other => row.get(column) == Some(other),
            },
            Predicate::In { column, values } => match row.get(column) {
                Some(actual) => values
                    .iter()
                    .any(|v| compare_values(actual, v) == Some(Ordering::Equal)),
                None => false,
            },
            Predicate::TextSearch { column, query } => match row.get(column) {
                Some(value) => query.matches(&tokenize_value(value)),
                None => false,
            },
            Predicate::Not(inner) => !inner.matches(row),
            Predicate::Or(inner) => inner.iter().any(|p| p.matches(row)),
        }
    }
}

/// Ordering between two scalar JSON values of the same kind.
pub(super) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn like_to_regex(pattern: &str, case_insensitive: bool) -> ServiceResult<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| {
            ServiceError::new(ErrorCode::InvalidRequest, "Invalid pattern")
                .with_details(e.to_string())
        })
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn tokenize_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => tokenize(s),
        Value::Array(items) => items.iter().flat_map(tokenize_value).collect(),
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

fn contains_phrase(document: &[String], phrase: &[String]) -> bool {
    phrase.is_empty() || document.windows(phrase.len()).any(|w| w == phrase)
}

/// One alternative of a text query: every term and phrase present, no
/// excluded term present.
#[derive(Debug, Default)]
pub(super) struct TextClause {
    terms: Vec<String>,
    phrases: Vec<Vec<String>>,
    excluded: Vec<String>,
}

impl TextClause {
    fn matches(&self, document: &[String]) -> bool {
        self.terms.iter().all(|t| document.contains(t))
            && self.phrases.iter().all(|p| contains_phrase(document, p))
            && !self.excluded.iter().any(|t| document.contains(t))
    }
}

#[derive(Debug)]
pub(super) struct TextQuery {
    clauses: Vec<TextClause>,
}

impl TextQuery {
    pub(super) fn parse(query: &str, kind: TextSearchKind) -> Self {
        let clauses = match kind {
            TextSearchKind::Plain => vec![TextClause {
                terms: tokenize(query),
                ..TextClause::default()
            }],
            TextSearchKind::Phrase => vec![TextClause {
                phrases: vec![tokenize(query)],
                ..TextClause::default()
            }],
            TextSearchKind::Websearch => Self::parse_websearch(query),
        };
        Self { clauses }
    }

    /// `"quoted phrase"`, `-excluded` and `or` between alternatives.
    fn parse_websearch(query: &str) -> Vec<TextClause> {
        let mut clauses = Vec::new();
        let mut current = TextClause::default();
        let mut rest = query.trim();

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix('"') {
                let end = stripped.find('"').unwrap_or(stripped.len());
                current.phrases.push(tokenize(&stripped[..end]));
                rest = stripped.get(end + 1..).unwrap_or("").trim_start();
                continue;
            }

            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let word = &rest[..end];
            rest = rest[end..].trim_start();

            if word.eq_ignore_ascii_case("or") {
                clauses.push(std::mem::take(&mut current));
            } else if let Some(excluded) = word.strip_prefix('-') {
                current.excluded.extend(tokenize(excluded));
            } else {
                current.terms.extend(tokenize(word));
            }
        }

        clauses.push(current);
        clauses
    }

    fn matches(&self, document: &[String]) -> bool {
        self.clauses.iter().any(|c| c.matches(document))
    }
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>, sort: &Sort) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let nulls_first = sort.resolved_nulls_first();

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => {
            if nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (Some(_), None) => {
            if nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Some(a), Some(b)) => {
            let ordering = compare_values(a, b).unwrap_or(Ordering::Equal);
            if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        }
    }
}

fn sort_records(rows: &mut [Record], keys: &[&Sort]) {
    if keys.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        keys.iter()
            .map(|key| compare_for_sort(a.get(&key.column), b.get(&key.column), key))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Order top-level rows, then the embedded arrays named by foreign-table keys.
pub(super) fn apply_order(rows: &mut [Record], order: &[Sort]) {
    let top: Vec<&Sort> = order.iter().filter(|s| s.foreign_table.is_none()).collect();
    sort_records(rows, &top);

    let mut scoped: Vec<(&str, Vec<&Sort>)> = Vec::new();
    for sort in order {
        if let Some(table) = sort.foreign_table.as_deref() {
            match scoped.iter_mut().find(|(t, _)| *t == table) {
                Some((_, keys)) => keys.push(sort),
                None => scoped.push((table, vec![sort])),
            }
        }
    }

    for (table, keys) in scoped {
        for row in rows.iter_mut() {
            if let Some(Value::Array(items)) = row.get_mut(table) {
                let mut embedded: Vec<Record> = items
                    .drain(..)
                    .filter_map(|v| match v {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect();
                sort_records(&mut embedded, &keys);
                items.extend(embedded.into_iter().map(Value::Object));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Selection {
    All,
    Column {
        alias: Option<String>,
        name: String,
    },
    Relation {
        alias: Option<String>,
        name: String,
        children: Vec<Selection>,
    },
}

/// Parse a column list such as `*, brand:brands(name), variants(id, price)`.
pub(super) fn parse_columns(columns: &str) -> ServiceResult<Vec<Selection>> {
    let invalid = |message: String| ServiceError::new(ErrorCode::InvalidRequest, message);
    let mut selections = Vec::new();

    for part in split_top_level(columns).map_err(invalid)? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part == "*" {
            selections.push(Selection::All);
            continue;
        }

        let (alias, body) = match part.split_once(':') {
            Some((alias, body)) if !alias.contains('(') => {
                (Some(alias.trim().to_string()), body.trim())
            }
            _ => (None, part),
        };

        match body.find('(') {
            Some(open) => {
                let inner = body[open + 1..].strip_suffix(')').ok_or_else(|| {
                    invalid(format!("Unbalanced parentheses in '{}'", part))
                })?;
                selections.push(Selection::Relation {
                    alias,
                    name: body[..open].trim().to_string(),
                    children: parse_columns(inner)?,
                });
            }
            None => selections.push(Selection::Column {
                alias,
                name: body.to_string(),
            }),
        }
    }

    Ok(selections)
}

fn split_top_level(input: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("Unbalanced parentheses in '{}'", input))?;
            }
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("Unbalanced parentheses in '{}'", input));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

pub(super) fn project(row: &Record, selections: &[Selection]) -> Record {
    if selections.is_empty() {
        return row.clone();
    }

    let mut out = Record::new();
    for selection in selections {
        match selection {
            Selection::All => {
                for (k, v) in row {
                    out.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            Selection::Column { alias, name } => {
                let value = row.get(name).cloned().unwrap_or(Value::Null);
                out.insert(alias.clone().unwrap_or_else(|| name.clone()), value);
            }
            Selection::Relation {
                alias,
                name,
                children,
            } => {
                let value = match row.get(name) {
                    Some(Value::Object(embedded)) => Value::Object(project(embedded, children)),
                    Some(Value::Array(items)) => Value::Array(
                        items
                            .iter()
                            .map(|item| match item {
                                Value::Object(embedded) => {
                                    Value::Object(project(embedded, children))
                                }
                                other => other.clone(),
                            })
                            .collect(),
                    ),
                    Some(other) => other.clone(),
                    None => Value::Null,
                };
                let key = alias.clone().unwrap_or_else(|| name.clone());
                if alias.is_some() {
                    out.remove(name);
                }
                out.insert(key, value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_like_wildcards() {
        let regex = like_to_regex("%rose_", false).unwrap();
        assert!(regex.is_match("Damask rose1"));
        assert!(!regex.is_match("Damask Rose1"));
        assert!(like_to_regex("%ROSE%", true).unwrap().is_match("damask rose"));
        assert!(like_to_regex("100\\%", false).unwrap().is_match("100%"));
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert_eq!(compare_values(&json!(2), &json!(2.0)), Some(Ordering::Equal));
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
    }

    #[test]
    fn test_neq_keeps_rows_of_other_type_but_not_nulls() {
        let predicate = compile(&Filter::Neq {
            column: "status".to_string(),
            value: json!("shipped"),
        })
        .unwrap();
        assert!(predicate.matches(&record(json!({"status": "pending"}))));
        assert!(!predicate.matches(&record(json!({"status": "shipped"}))));
        assert!(!predicate.matches(&record(json!({"status": null}))));
    }

    #[test]
    fn test_websearch_query() {
        let query = TextQuery::parse("\"eau de parfum\" -tester or cologne", TextSearchKind::Websearch);
        assert!(query.matches(&tokenize("Rose eau de parfum 50ml")));
        assert!(!query.matches(&tokenize("Rose eau de parfum tester")));
        assert!(query.matches(&tokenize("Citrus cologne tester")));
        assert!(!query.matches(&tokenize("eau fraiche")));
    }

    #[test]
    fn test_phrase_query_requires_adjacency() {
        let query = TextQuery::parse("white musk", TextSearchKind::Phrase);
        assert!(query.matches(&tokenize("soft white musk base")));
        assert!(!query.matches(&tokenize("white amber musk")));
    }

    #[test]
    fn test_nulls_placement() {
        let mut rows = vec![
            record(json!({"price": null})),
            record(json!({"price": 10})),
            record(json!({"price": 5})),
        ];
        apply_order(&mut rows, &[Sort::asc("price")]);
        assert_eq!(rows[0]["price"], json!(5));
        assert_eq!(rows[2]["price"], Value::Null);

        apply_order(&mut rows, &[Sort::desc("price")]);
        assert_eq!(rows[0]["price"], Value::Null);
        assert_eq!(rows[1]["price"], json!(10));
    }

    #[test]
    fn test_foreign_table_order_sorts_embedded_rows() {
        let mut rows = vec![record(json!({
            "id": 1,
            "variants": [{"size": 100}, {"size": 30}, {"size": 50}]
        }))];
        apply_order(&mut rows, &[Sort::asc("size").foreign_table("variants")]);
        assert_eq!(
            rows[0]["variants"],
            json!([{"size": 30}, {"size": 50}, {"size": 100}])
        );
    }

    #[test]
    fn test_projection_with_nested_relation_and_alias() {
        let row = record(json!({
            "id": 7,
            "name": "Noir",
            "brands": {"id": 2, "name": "Maison"},
            "variants": [{"id": 1, "price": 90, "stock": 3}]
        }));
        let selections = parse_columns("id, brand:brands(name), variants(price)").unwrap();
        assert_eq!(
            Value::Object(project(&row, &selections)),
            json!({
                "id": 7,
                "brand": {"name": "Maison"},
                "variants": [{"price": 90}]
            })
        );
    }

    #[test]
    fn test_unbalanced_columns_rejected() {
        assert!(parse_columns("id, variants(price").is_err());
        assert!(parse_columns("id)").is_err());
    }
}
