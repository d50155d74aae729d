use super::TableClient;
use crate::cache::{Cache, CacheKey, CachedList};
use crate::schema::{
    Record, Table, from_record, matches_primary_key, require_primary_key, split_primary_key,
    to_record,
};
use crate::service::WriteRequest;
use crate::{AtelierError, AtelierResult};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Insert,
    Update,
    Delete,
    Upsert,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationAction::Insert => "insert",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
            MutationAction::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

/// The serialized input of one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationVariables {
    pub action: MutationAction,
    pub records: Vec<Record>,
}

/// A write against table `T`.
pub struct Mutation<T: Table> {
    variables: MutationVariables,
    _table: PhantomData<fn() -> T>,
}

impl<T: Table> Mutation<T> {
    pub fn from_records(action: MutationAction, records: Vec<Record>) -> Self {
        Self {
            variables: MutationVariables { action, records },
            _table: PhantomData,
        }
    }

    pub fn insert(rows: &[T::Insert]) -> AtelierResult<Self> {
        let records = rows.iter().map(to_record).collect::<AtelierResult<_>>()?;
        Ok(Self::from_records(MutationAction::Insert, records))
    }

    /// Patch one row; `patch` carries the primary key and the changed fields.
    pub fn update(patch: &T::Update) -> AtelierResult<Self> {
        Ok(Self::from_records(
            MutationAction::Update,
            vec![to_record(patch)?],
        ))
    }

    /// Delete the row identified by the primary key fields of `key`.
    pub fn delete(key: &T::Update) -> AtelierResult<Self> {
        Ok(Self::from_records(MutationAction::Delete, vec![to_record(key)?]))
    }

    pub fn upsert(rows: &[T::Insert]) -> AtelierResult<Self> {
        let records = rows.iter().map(to_record).collect::<AtelierResult<_>>()?;
        Ok(Self::from_records(MutationAction::Upsert, records))
    }

    pub fn action(&self) -> MutationAction {
        self.variables.action
    }

    pub fn variables(&self) -> &MutationVariables {
        &self.variables
    }

    /// Primary key checks; runs before anything is sent.
    pub fn validate(&self) -> AtelierResult<()> {
        match self.variables.action {
            MutationAction::Insert => Ok(()),
            MutationAction::Update | MutationAction::Delete | MutationAction::Upsert => {
                if self.variables.records.is_empty() {
                    return Err(AtelierError::MissingPrimaryKey {
                        table: T::NAME.to_string(),
                        column: T::PRIMARY_KEY.join(","),
                    });
                }
                for record in &self.variables.records {
                    require_primary_key(T::NAME, T::PRIMARY_KEY, record)?;
                }
                Ok(())
            }
        }
    }

    fn to_request(&self) -> WriteRequest {
        let table = T::NAME.to_string();
        let records = &self.variables.records;
        match self.variables.action {
            MutationAction::Insert => WriteRequest::Insert {
                table,
                rows: records.clone(),
            },
            MutationAction::Update => {
                let (matching, data) = split_primary_key(T::PRIMARY_KEY, &records[0]);
                WriteRequest::Update {
                    table,
                    matching,
                    data,
                }
            }
            MutationAction::Delete => {
                let (matching, _) = split_primary_key(T::PRIMARY_KEY, &records[0]);
                WriteRequest::Delete { table, matching }
            }
            MutationAction::Upsert => WriteRequest::Upsert {
                table,
                rows: records.clone(),
                on_conflict: T::PRIMARY_KEY.join(","),
            },
        }
    }
}

impl<T: Table> fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("table", &T::NAME)
            .field("variables", &self.variables)
            .finish()
    }
}

/// What a failed mutation needs to undo its optimistic patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationContext {
    pub previous: Option<CachedList>,
    pub applied: bool,
}

impl MutationContext {
    /// Capture the current entry under `key` ahead of a patch.
    pub fn snapshot(cache: &dyn Cache, key: &CacheKey) -> Self {
        Self {
            previous: cache.get(key),
            applied: true,
        }
    }
}

pub type OptimisticFn = Box<dyn FnOnce(&MutationVariables, &dyn Cache) -> MutationContext + Send>;

pub enum OptimisticUpdate {
    /// Patch the acting list entry with [`apply_optimistic`].
    Default,
    /// Caller-managed patch; the returned context drives rollback.
    Custom(OptimisticFn),
    Disabled,
}

type SuccessFn<R> = Box<dyn FnOnce(Option<&[R]>, &MutationVariables) + Send>;
type ErrorFn = Box<dyn FnOnce(&AtelierError, &MutationVariables) + Send>;

pub struct MutationOptions<T: Table> {
    list_key: Option<CacheKey>,
    invalidate: Vec<CacheKey>,
    optimistic: OptimisticUpdate,
    on_success: Option<SuccessFn<T::Row>>,
    on_error: Option<ErrorFn>,
}

impl<T: Table> MutationOptions<T> {
    pub fn new() -> Self {
        Self {
            list_key: None,
            invalidate: Vec::new(),
            optimistic: OptimisticUpdate::Default,
            on_success: None,
            on_error: None,
        }
    }

    /// Key of the list the optimistic patch applies to. Defaults to
    /// `[table, "list"]`.
    pub fn list_key(mut self, key: CacheKey) -> Self {
        self.list_key = Some(key);
        self
    }

    /// Register a key to invalidate on success. Without any, the table's
    /// default list key is invalidated.
    pub fn invalidate(mut self, key: CacheKey) -> Self {
        self.invalidate.push(key);
        self
    }

    pub fn optimistic(mut self, optimistic: OptimisticUpdate) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn on_success(
        mut self,
        callback: impl FnOnce(Option<&[T::Row]>, &MutationVariables) + Send + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(
        mut self,
        callback: impl FnOnce(&AtelierError, &MutationVariables) + Send + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl<T: Table> Default for MutationOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the default optimistic patch for `variables` to a cached list.
pub fn apply_optimistic(
    list: &mut CachedList,
    key: &[&str],
    variables: &MutationVariables,
) {
    let records = &variables.records;
    match variables.action {
        MutationAction::Insert => {
            list.rows.extend(records.iter().cloned());
            list.count = list.count.map(|c| c + records.len() as u64);
        }
        MutationAction::Update => {
            for row in list.rows.iter_mut() {
                let patches: Vec<&Record> = records
                    .iter()
                    .filter(|r| matches_primary_key(key, row, r))
                    .collect();
                for (column, value) in patches.into_iter().flatten() {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
        MutationAction::Delete => {
            let before = list.rows.len();
            list.rows
                .retain(|row| !records.iter().any(|r| matches_primary_key(key, row, r)));
            let removed = (before - list.rows.len()) as u64;
            list.count = list.count.map(|c| c.saturating_sub(removed));
        }
        MutationAction::Upsert => {
            for record in records {
                match list
                    .rows
                    .iter()
                    .position(|row| matches_primary_key(key, row, record))
                {
                    Some(index) => list.rows[index] = record.clone(),
                    None => {
                        list.rows.push(record.clone());
                        list.count = list.count.map(|c| c + 1);
                    }
                }
            }
        }
    }
}

impl TableClient {
    /// Write to table `T`, keeping the cache in step.
    ///
    /// Primary key checks run before the optimistic patch and before the
    /// service is called. On success the registered keys are invalidated;
    /// on failure the optimistic patch is rolled back. Deletes resolve to
    /// `None`.
    pub async fn mutate<T: Table>(
        &self,
        mutation: Mutation<T>,
        options: MutationOptions<T>,
    ) -> AtelierResult<Option<Vec<T::Row>>> {
        mutation.validate()?;
        let request = mutation.to_request();
        let variables = mutation.variables;
        let MutationOptions {
            list_key,
            invalidate,
            optimistic,
            on_success,
            on_error,
        } = options;
        let list_key = list_key.unwrap_or_else(|| CacheKey::list(T::NAME));

        let context = match optimistic {
            OptimisticUpdate::Custom(patch) => patch(&variables, self.cache.as_ref()),
            OptimisticUpdate::Default => self.apply_default(&list_key, T::PRIMARY_KEY, &variables),
            OptimisticUpdate::Disabled => MutationContext::default(),
        };

        debug!(
            table = T::NAME,
            action = %variables.action,
            rows = variables.records.len(),
            optimistic = context.applied,
            "mutation"
        );

        match self.service.write(request).await {
            Ok(response) => {
                let keys = if invalidate.is_empty() {
                    vec![CacheKey::list(T::NAME)]
                } else {
                    invalidate
                };
                for key in &keys {
                    self.cache.invalidate(key);
                }

                let rows = match variables.action {
                    MutationAction::Delete => None,
                    _ => match response
                        .rows
                        .into_iter()
                        .map(from_record)
                        .collect::<AtelierResult<Vec<T::Row>>>()
                    {
                        Ok(rows) => Some(rows),
                        Err(error) => {
                            warn!(table = T::NAME, error = %error, "failed to decode written rows");
                            if let Some(callback) = on_error {
                                callback(&error, &variables);
                            }
                            return Err(error);
                        }
                    },
                };
                if let Some(callback) = on_success {
                    callback(rows.as_deref(), &variables);
                }
                Ok(rows)
            }
            Err(e) => {
                warn!(table = T::NAME, action = %variables.action, error = %e, "mutation failed");
                self.rollback(&list_key, context);
                let error = AtelierError::Mutation(e);
                if let Some(callback) = on_error {
                    callback(&error, &variables);
                }
                Err(error)
            }
        }
    }

    fn apply_default(
        &self,
        key: &CacheKey,
        primary_key: &'static [&'static str],
        variables: &MutationVariables,
    ) -> MutationContext {
        let context = MutationContext::snapshot(self.cache.as_ref(), key);
        let variables = variables.clone();
        self.cache.set(
            key,
            Box::new(move |current: Option<CachedList>| {
                current.map(|mut list| {
                    apply_optimistic(&mut list, primary_key, &variables);
                    list
                })
            }),
        );
        context
    }

    fn rollback(&self, key: &CacheKey, context: MutationContext) {
        if !context.applied {
            return;
        }
        match context.previous {
            Some(previous) => {
                debug!(key = %key, "restoring cache snapshot");
                self.cache.replace(key, Some(previous));
            }
            None => {
                debug!(key = %key, "no snapshot to restore, invalidating");
                self.cache.invalidate(key);
            }
        }
    }
}
