use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSearchKind {
    #[default]
    Plain,
    Phrase,
    Websearch,
}

/// A row predicate understood by table services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    Gt { column: String, value: Value },
    Gte { column: String, value: Value },
    Lt { column: String, value: Value },
    Lte { column: String, value: Value },
    /// SQL `LIKE`: `%` matches any run of characters, `_` exactly one.
    Like { column: String, pattern: String },
    #[serde(rename = "ilike")]
    ILike { column: String, pattern: String },
    /// `IS NULL` / `IS TRUE` / `IS FALSE`.
    Is { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    TextSearch {
        column: String,
        query: String,
        config: Option<String>,
        kind: TextSearchKind,
    },
    Not { filter: Box<Filter> },
    Or { filters: Vec<Filter> },
}

/// Chainable filter composer handed to caller-supplied filter functions.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    filters: Vec<Filter>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::Neq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::Gt {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::Gte {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::Lt {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::Lte {
            column: column.into(),
            value: value.into(),
        })
    }

    /// Inclusive range on one column.
    pub fn between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let column = column.into();
        self.gte(column.clone(), low).lte(column, high)
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(Filter::Like {
            column: column.into(),
            pattern: pattern.into(),
        })
    }

    pub fn ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(Filter::ILike {
            column: column.into(),
            pattern: pattern.into(),
        })
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.push(Filter::Is {
            column: column.into(),
            value: Value::Null,
        })
    }

    pub fn is(self, column: impl Into<String>, value: bool) -> Self {
        self.push(Filter::Is {
            column: column.into(),
            value: Value::Bool(value),
        })
    }

    pub fn in_list<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.push(Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn text_search(
        self,
        column: impl Into<String>,
        query: impl Into<String>,
        config: Option<String>,
        kind: TextSearchKind,
    ) -> Self {
        self.push(Filter::TextSearch {
            column: column.into(),
            query: query.into(),
            config,
            kind,
        })
    }

    pub fn not(self, build: impl FnOnce(Filters) -> Filters) -> Self {
        let mut inner = build(Filters::new()).into_inner();
        match inner.len() {
            0 => self,
            1 => self.push(Filter::Not {
                filter: Box::new(inner.remove(0)),
            }),
            // NOT (a AND b) == (NOT a) OR (NOT b)
            _ => self.push(Filter::Or {
                filters: inner
                    .into_iter()
                    .map(|f| Filter::Not { filter: Box::new(f) })
                    .collect(),
            }),
        }
    }

    /// Match rows satisfying any of the filters built by `build`.
    pub fn or(self, build: impl FnOnce(Filters) -> Filters) -> Self {
        let filters = build(Filters::new()).into_inner();
        if filters.is_empty() {
            return self;
        }
        self.push(Filter::Or { filters })
    }

    pub fn push(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn into_inner(self) -> Vec<Filter> {
        self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_between_expands_to_inclusive_bounds() {
        let filters = Filters::new().between("price", 50, 120).into_inner();
        assert_eq!(
            filters,
            vec![
                Filter::Gte {
                    column: "price".to_string(),
                    value: json!(50),
                },
                Filter::Lte {
                    column: "price".to_string(),
                    value: json!(120),
                },
            ]
        );
    }

    #[test]
    fn test_not_of_conjunction_becomes_disjunction() {
        let filters = Filters::new()
            .not(|f| f.eq("brand_id", 1).eq("active", true))
            .into_inner();
        assert_eq!(filters.len(), 1);
        match &filters[0] {
            Filter::Or { filters } => {
                assert_eq!(filters.len(), 2);
                assert!(filters.iter().all(|f| matches!(f, Filter::Not { .. })));
            }
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_or_is_dropped() {
        assert!(Filters::new().or(|f| f).is_empty());
    }

    #[test]
    fn test_filter_wire_format() {
        let filter = Filter::ILike {
            column: "name".to_string(),
            pattern: "%musk%".to_string(),
        };
        let encoded = serde_json::to_value(&filter).unwrap();
        assert_eq!(encoded, json!({"op": "ilike", "column": "name", "pattern": "%musk%"}));
    }
}
