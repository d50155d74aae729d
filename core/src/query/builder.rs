//! Stage-typed select builder
//!
//! A select moves through `Unfiltered -> Filtered -> Sorted -> TerminalQuery`.
//! Each stage only exposes the steps that may follow it, so a filter can not
//! be appended after ordering and nothing can follow the row restriction.

use super::{CountMode, Filters, Pagination, Search, SelectRequest, Sort};
use crate::AtelierResult;
use std::marker::PhantomData;

#[derive(Debug)]
pub struct Unfiltered;

#[derive(Debug)]
pub struct Filtered;

#[derive(Debug)]
pub struct Sorted;

mod sealed {
    pub trait Stage {}
    impl Stage for super::Unfiltered {}
    impl Stage for super::Filtered {}
    impl Stage for super::Sorted {}
}

/// Stages that still accept filters.
pub trait Filterable: sealed::Stage {}
impl Filterable for Unfiltered {}
impl Filterable for Filtered {}

/// Stages that accept sort keys and a row restriction.
pub trait Orderable: sealed::Stage {}
impl Orderable for Unfiltered {}
impl Orderable for Filtered {}
impl Orderable for Sorted {}

#[derive(Debug)]
pub struct SelectBuilder<S> {
    request: SelectRequest,
    _stage: PhantomData<S>,
}

impl<S> SelectBuilder<S> {
    fn advance<N>(self) -> SelectBuilder<N> {
        SelectBuilder {
            request: self.request,
            _stage: PhantomData,
        }
    }

    pub fn request(&self) -> &SelectRequest {
        &self.request
    }
}

impl SelectBuilder<Unfiltered> {
    pub fn new(table: impl Into<String>, columns: impl Into<String>) -> Self {
        Self {
            request: SelectRequest::new(table, columns),
            _stage: PhantomData,
        }
    }

    pub fn count(mut self, mode: Option<CountMode>) -> Self {
        self.request.count = mode;
        self
    }
}

impl<S: Filterable> SelectBuilder<S> {
    /// Append the filters produced by `build`.
    pub fn filter(mut self, build: impl FnOnce(Filters) -> Filters) -> SelectBuilder<Filtered> {
        self.request
            .filters
            .extend(build(Filters::new()).into_inner());
        self.advance()
    }

    pub fn search(mut self, search: &Search) -> SelectBuilder<Filtered> {
        self.request.filters.push(search.to_filter());
        self.advance()
    }
}

impl<S: Orderable> SelectBuilder<S> {
    pub fn order(mut self, sort: &Sort) -> SelectBuilder<Sorted> {
        self.request.order.push(sort.clone());
        self.advance()
    }

    /// Apply sort keys in the order given. An empty slice is allowed.
    pub fn order_by(mut self, sorts: &[Sort]) -> SelectBuilder<Sorted> {
        self.request.order.extend(sorts.iter().cloned());
        self.advance()
    }

    /// Expect at most one row.
    pub fn single(mut self) -> TerminalQuery {
        self.request.single = true;
        TerminalQuery {
            request: self.request,
        }
    }

    /// Restrict to the inclusive offsets `[from, to]`.
    pub fn range(mut self, from: u64, to: u64) -> TerminalQuery {
        self.request.range = Some((from, to));
        TerminalQuery {
            request: self.request,
        }
    }

    pub fn paginate(self, pagination: &Pagination) -> AtelierResult<TerminalQuery> {
        let (from, to) = pagination.range()?;
        Ok(self.range(from, to))
    }

    /// No row restriction beyond whatever limit the service imposes.
    pub fn all(self) -> TerminalQuery {
        TerminalQuery {
            request: self.request,
        }
    }
}

/// A complete select, ready to send.
#[derive(Debug, Clone)]
pub struct TerminalQuery {
    request: SelectRequest,
}

impl TerminalQuery {
    pub fn request(&self) -> &SelectRequest {
        &self.request
    }

    pub fn is_single(&self) -> bool {
        self.request.single
    }

    pub fn into_request(self) -> SelectRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, SearchMode};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_stages_compose_in_order() {
        let query = SelectBuilder::new("products", "*, variants(*)")
            .count(Some(CountMode::Exact))
            .filter(|f| f.eq("brand_id", 4))
            .search(&Search::new("name", "oud", SearchMode::ILike))
            .order(&Sort::desc("created_at"))
            .order(&Sort::asc("price").foreign_table("variants"))
            .paginate(&Pagination::new(2, 25))
            .unwrap();

        let request = query.into_request();
        assert_eq!(request.table, "products");
        assert_eq!(request.count, Some(CountMode::Exact));
        assert_eq!(
            request.filters,
            vec![
                Filter::Eq {
                    column: "brand_id".to_string(),
                    value: json!(4),
                },
                Filter::ILike {
                    column: "name".to_string(),
                    pattern: "%oud%".to_string(),
                },
            ]
        );
        assert_eq!(request.order.len(), 2);
        assert_eq!(request.order[1].foreign_table.as_deref(), Some("variants"));
        assert_eq!(request.range, Some((25, 49)));
        assert!(!request.single);
    }

    #[test]
    fn test_single_sets_flag_without_range() {
        let query = SelectBuilder::new("orders", "*")
            .filter(|f| f.eq("id", 9))
            .single();
        assert!(query.is_single());
        assert_eq!(query.request().range, None);
    }

    #[test]
    fn test_empty_order_by_keeps_request() {
        let query = SelectBuilder::new("brands", "*").order_by(&[]).all();
        assert_eq!(query.into_request(), SelectRequest::new("brands", "*"));
    }
}
