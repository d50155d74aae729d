use super::TableClient;
use crate::cache::{CacheKey, CachedList};
use crate::query::{
    CountMode, Filters, Pagination, Search, SelectBuilder, Sort, TerminalQuery, page_count,
};
use crate::schema::{Record, Table, from_record};
use crate::{AtelierError, AtelierResult};
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// Caller-supplied filter composition.
pub type FilterFn = Box<dyn FnOnce(Filters) -> Filters + Send>;

/// Everything one fetch asks for.
pub struct FetchOptions<T: Table> {
    columns: String,
    count: Option<CountMode>,
    filter: Option<FilterFn>,
    search: Option<Search>,
    sort: Vec<Sort>,
    pagination: Option<Pagination>,
    single: bool,
    _table: PhantomData<fn() -> T>,
}

impl<T: Table> FetchOptions<T> {
    pub fn new() -> Self {
        Self {
            columns: "*".to_string(),
            count: None,
            filter: None,
            search: None,
            sort: Vec::new(),
            pagination: None,
            single: false,
            _table: PhantomData,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn count(mut self, mode: CountMode) -> Self {
        self.count = Some(mode);
        self
    }

    pub fn filter(mut self, build: impl FnOnce(Filters) -> Filters + Send + 'static) -> Self {
        self.filter = Some(Box::new(build));
        self
    }

    pub fn search(mut self, search: Search) -> Self {
        self.search = Some(search);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    /// Request the 1-based `page` of `page_size` rows.
    pub fn paginate(mut self, page: u64, page_size: u64) -> Self {
        self.pagination = Some(Pagination::new(page, page_size));
        self
    }

    /// Expect at most one row. Takes precedence over pagination.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Assemble the select in order: columns and count, filters, search,
    /// sort keys, then the row restriction.
    pub fn into_query(self) -> AtelierResult<TerminalQuery> {
        let builder = SelectBuilder::new(T::NAME, self.columns).count(self.count);
        let mut builder = match self.filter {
            Some(build) => builder.filter(build),
            None => builder.filter(|f| f),
        };
        if let Some(search) = &self.search {
            builder = builder.search(search);
        }
        let builder = builder.order_by(&self.sort);

        if self.single {
            Ok(builder.single())
        } else if let Some(pagination) = &self.pagination {
            builder.paginate(pagination)
        } else {
            Ok(builder.all())
        }
    }
}

impl<T: Table> Default for FetchOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Table> fmt::Debug for FetchOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("table", &T::NAME)
            .field("columns", &self.columns)
            .field("count", &self.count)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("search", &self.search)
            .field("sort", &self.sort)
            .field("pagination", &self.pagination)
            .field("single", &self.single)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rows<R> {
    One(R),
    Many(Vec<R>),
}

impl<R> Rows<R> {
    fn try_map<U>(self, mut f: impl FnMut(R) -> AtelierResult<U>) -> AtelierResult<Rows<U>> {
        Ok(match self {
            Rows::One(row) => Rows::One(f(row)?),
            Rows::Many(rows) => Rows::Many(rows.into_iter().map(f).collect::<AtelierResult<_>>()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult<R> {
    /// `None` when a single-row fetch matched nothing.
    pub data: Option<Rows<R>>,
    /// Present only when a count was requested.
    pub count: Option<u64>,
}

impl<R> FetchResult<R> {
    pub fn not_found() -> Self {
        Self {
            data: None,
            count: None,
        }
    }

    /// The single row, or the first of many.
    pub fn one(self) -> Option<R> {
        match self.data? {
            Rows::One(row) => Some(row),
            Rows::Many(rows) => rows.into_iter().next(),
        }
    }

    pub fn into_vec(self) -> Vec<R> {
        match self.data {
            Some(Rows::One(row)) => vec![row],
            Some(Rows::Many(rows)) => rows,
            None => Vec::new(),
        }
    }

    /// Total pages for `page_size`; needs an exact count.
    pub fn page_count(&self, page_size: u64) -> Option<u64> {
        self.count.map(|total| page_count(total, page_size))
    }
}

impl FetchResult<Record> {
    fn from_rows(mut rows: Vec<Record>, count: Option<u64>, single: bool) -> Self {
        let data = if single {
            if rows.is_empty() {
                None
            } else {
                Some(Rows::One(rows.swap_remove(0)))
            }
        } else {
            Some(Rows::Many(rows))
        };
        Self { data, count }
    }

    fn to_cached(&self) -> CachedList {
        let rows = match &self.data {
            Some(Rows::One(row)) => vec![row.clone()],
            Some(Rows::Many(rows)) => rows.clone(),
            None => Vec::new(),
        };
        CachedList::new(rows, self.count)
    }

    fn decode<T: Table>(self) -> AtelierResult<FetchResult<T::Row>> {
        Ok(FetchResult {
            data: self.data.map(|rows| rows.try_map(from_record)).transpose()?,
            count: self.count,
        })
    }
}

impl TableClient {
    /// Run one fetch against the table service.
    pub async fn fetch<T: Table>(
        &self,
        options: FetchOptions<T>,
    ) -> AtelierResult<FetchResult<T::Row>> {
        let query = options.into_query()?;
        self.fetch_records(query).await?.decode::<T>()
    }

    /// Serve from `key` when the entry is fresh; otherwise fetch and store the
    /// result under `key`.
    pub async fn fetch_cached<T: Table>(
        &self,
        key: &CacheKey,
        options: FetchOptions<T>,
    ) -> AtelierResult<FetchResult<T::Row>> {
        let single = options.is_single();
        if !self.cache.is_stale(key)
            && let Some(list) = self.cache.get(key)
        {
            debug!(key = %key, "serving fetch from cache");
            return FetchResult::from_rows(list.rows, list.count, single).decode::<T>();
        }

        let query = options.into_query()?;
        let result = self.fetch_records(query).await?;
        self.cache.fill(key, result.to_cached());
        result.decode::<T>()
    }

    async fn fetch_records(&self, query: TerminalQuery) -> AtelierResult<FetchResult<Record>> {
        let single = query.is_single();
        let request = query.into_request();
        let table = request.table.clone();
        debug!(
            table = %table,
            filters = request.filters.len(),
            range = ?request.range,
            single,
            "fetch"
        );

        match self.service.select(request).await {
            Ok(response) => Ok(FetchResult::from_rows(response.rows, response.count, single)),
            Err(e) if single && e.is_no_rows() => {
                debug!(table = %table, "single fetch matched no rows");
                Ok(FetchResult::not_found())
            }
            Err(e) => {
                debug!(table = %table, error = %e, "fetch failed");
                Err(AtelierError::Query(e))
            }
        }
    }
}
