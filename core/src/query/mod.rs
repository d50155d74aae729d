//! Query model
//!
//! Everything a fetch can ask of a table service: column selection, filters,
//! search directives, sort keys, pagination and the single-row flag. The
//! [`builder`] module assembles these into a [`SelectRequest`] one stage at a
//! time.

pub mod builder;
pub mod filter;

pub use builder::{Filtered, SelectBuilder, Sorted, TerminalQuery, Unfiltered};
pub use filter::{Filter, Filters, TextSearchKind};

use crate::{AtelierError, AtelierResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMode {
    Exact,
    Planned,
    Estimated,
}

/// One sort key. Without an explicit null placement, nulls sort last when
/// ascending and first when descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
    /// Orders rows of an embedded relation instead of the top-level rows.
    pub foreign_table: Option<String>,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
            nulls_first: None,
            foreign_table: None,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            ascending: false,
            ..Self::asc(column)
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls_first = Some(true);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls_first = Some(false);
        self
    }

    pub fn foreign_table(mut self, table: impl Into<String>) -> Self {
        self.foreign_table = Some(table.into());
        self
    }

    pub fn resolved_nulls_first(&self) -> bool {
        self.nulls_first.unwrap_or(!self.ascending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Eq,
    Like,
    ILike,
    Fts,
}

impl FromStr for SearchMode {
    type Err = AtelierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(SearchMode::Eq),
            "like" => Ok(SearchMode::Like),
            "ilike" => Ok(SearchMode::ILike),
            "fts" => Ok(SearchMode::Fts),
            other => Err(AtelierError::InvalidSearchMode(other.to_string())),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMode::Eq => "eq",
            SearchMode::Like => "like",
            SearchMode::ILike => "ilike",
            SearchMode::Fts => "fts",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSearchOptions {
    /// Text search configuration name, e.g. `english`.
    pub config: Option<String>,
    pub kind: TextSearchKind,
}

/// Free-text search over one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub column: String,
    pub term: String,
    pub mode: SearchMode,
    pub options: Option<TextSearchOptions>,
}

impl Search {
    pub fn new(column: impl Into<String>, term: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            column: column.into(),
            term: term.into(),
            mode,
            options: None,
        }
    }

    /// Build a search from a textual mode such as `"ilike"`.
    pub fn parse(
        column: impl Into<String>,
        term: impl Into<String>,
        mode: &str,
    ) -> AtelierResult<Self> {
        Ok(Self::new(column, term, mode.parse()?))
    }

    pub fn with_options(mut self, options: TextSearchOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// The filter this directive stands for.
    pub fn to_filter(&self) -> Filter {
        match self.mode {
            SearchMode::Fts => {
                let options = self.options.clone().unwrap_or_default();
                Filter::TextSearch {
                    column: self.column.clone(),
                    query: self.term.clone(),
                    config: options.config,
                    kind: options.kind,
                }
            }
            SearchMode::ILike => Filter::ILike {
                column: self.column.clone(),
                pattern: format!("%{}%", self.term),
            },
            SearchMode::Like => Filter::Like {
                column: self.column.clone(),
                pattern: format!("%{}%", self.term),
            },
            SearchMode::Eq => Filter::Eq {
                column: self.column.clone(),
                value: serde_json::Value::String(self.term.clone()),
            },
        }
    }
}

/// A 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Pagination {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }

    /// Inclusive `[from, to]` row offsets of this page.
    pub fn range(&self) -> AtelierResult<(u64, u64)> {
        let invalid = || AtelierError::InvalidPagination {
            page: self.page,
            page_size: self.page_size,
        };
        if self.page == 0 || self.page_size == 0 {
            return Err(invalid());
        }
        // The last offset of the page must fit in a u64.
        let end = self.page.checked_mul(self.page_size).ok_or_else(invalid)?;
        Ok((end - self.page_size, end - 1))
    }
}

/// Number of pages needed for `total` rows.
pub fn page_count(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// The fully assembled select sent to a table service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub table: String,
    pub columns: String,
    pub count: Option<CountMode>,
    pub filters: Vec<Filter>,
    pub order: Vec<Sort>,
    /// Inclusive row offsets.
    pub range: Option<(u64, u64)>,
    pub single: bool,
}

impl SelectRequest {
    pub fn new(table: impl Into<String>, columns: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into(),
            count: None,
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
            single: false,
        }
    }
}
