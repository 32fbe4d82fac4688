//! Remote collection client boundary.
//!
//! The engine talks to the external relational store through
//! [`RemoteCollection`]: point queries, writes, and a row-level change feed.
//! Rows travel as untyped JSON; they are decoded into domain types exactly
//! once, here, so everything downstream works on [`ChangeEvent`] and typed
//! records.

use crate::types::{Contribution, ContributionId, Item, ItemId, Reservation, ReservationId};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Tables of the remote store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    /// `lists(id, title, event_date, owner_id, created_at)`
    Lists,
    /// `items(id, list_id, name, url, price, image_url, created_at)`
    Items,
    /// `reservations(id, item_id, reserver_name, created_at)`
    Reservations,
    /// `contributions(id, item_id, contributor_name, amount, created_at)`
    Contributions,
}

impl Table {
    /// Table name as used by the store
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lists => "lists",
            Self::Items => "items",
            Self::Reservations => "reservations",
            Self::Contributions => "contributions",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Row predicate for queries and subscriptions
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Every row
    All,
    /// `column = value`
    Eq {
        /// Column name
        column: String,
        /// Expected value
        value: Value,
    },
    /// `column IN (values)`
    In {
        /// Column name
        column: String,
        /// Accepted values
        values: Vec<Value>,
    },
}

impl Filter {
    /// `column = value`
    #[must_use]
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Self::Eq {
            column: column.to_string(),
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    /// `column IN (values)`
    #[must_use]
    pub fn any_of<T: Serialize>(column: &str, values: impl IntoIterator<Item = T>) -> Self {
        Self::In {
            column: column.to_string(),
            values: values
                .into_iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect(),
        }
    }

    /// Whether `row` satisfies the predicate
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq { column, value } => row.get(column) == Some(value),
            Self::In { column, values } => row
                .get(column)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
        }
    }
}

/// Sort order for queries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort on
    pub column: String,
    /// Largest first when `true`
    pub descending: bool,
}

impl OrderBy {
    /// Ascending on `column`
    #[must_use]
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
        }
    }

    /// Descending on `column`
    #[must_use]
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: true,
        }
    }
}

/// Errors reported by the remote store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Write rejected by a constraint
    #[error("conflict on {table}: {reason}")]
    Conflict {
        /// Table written
        table: Table,
        /// Constraint description
        reason: String,
    },

    /// Row does not exist
    #[error("{table} {id} not found")]
    NotFound {
        /// Table searched
        table: Table,
        /// Missing id
        id: String,
    },

    /// Network or server failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Row did not have the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

/// Kind of a row-level change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Row created
    Insert,
    /// Row modified
    Update,
    /// Row removed
    Delete,
}

/// One untyped change delivered by the feed
#[derive(Clone, Debug, PartialEq)]
pub struct RowChange {
    /// Table the row belongs to
    pub table: Table,
    /// What happened
    pub kind: ChangeKind,
    /// New row for inserts and updates, old row for deletes
    pub row: Value,
}

/// Future returned by [`RemoteCollection`] operations
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Change feed stream
///
/// Delivered at-least-once, best-effort ordered within one table. An `Err`
/// item means the feed broke; nothing follows it.
pub type ChangeFeed = Pin<Box<dyn Stream<Item = Result<RowChange, RemoteError>> + Send>>;

/// Thin interface over the external store
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it can be used as `Arc<dyn RemoteCollection>`.
pub trait RemoteCollection: Send + Sync {
    /// Rows of `table` matching `filter`, optionally sorted
    fn query(&self, table: Table, filter: Filter, order: Option<OrderBy>)
    -> RemoteFuture<'_, Vec<Value>>;

    /// Insert a record; the store assigns `id` and `created_at`
    ///
    /// Fails with [`RemoteError::Conflict`] when a constraint rejects the row.
    fn insert(&self, table: Table, record: Value) -> RemoteFuture<'_, Value>;

    /// Replace the given fields of row `id`
    fn update(&self, table: Table, id: Uuid, fields: Value) -> RemoteFuture<'_, Value>;

    /// Delete row `id`; dependent rows are removed by the store
    fn delete(&self, table: Table, id: Uuid) -> RemoteFuture<'_, ()>;

    /// Open a change feed for rows of `table` matching `filter`
    fn subscribe(&self, table: Table, filter: Filter) -> RemoteFuture<'_, ChangeFeed>;
}

/// Decode a row into a typed record
///
/// # Errors
///
/// Returns [`RemoteError::Decode`] if the row has the wrong shape.
pub fn decode_row<T: DeserializeOwned>(table: Table, row: Value) -> Result<T, RemoteError> {
    serde_json::from_value(row).map_err(|e| RemoteError::Decode(format!("{table} row: {e}")))
}

/// Decode many rows
///
/// # Errors
///
/// Returns the first decode failure.
pub fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>, RemoteError> {
    rows.into_iter().map(|row| decode_row(table, row)).collect()
}

/// Encode a typed record for a write
///
/// # Errors
///
/// Returns [`RemoteError::Decode`] if serialization fails.
pub fn encode_row<T: Serialize>(table: Table, record: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(record).map_err(|e| RemoteError::Decode(format!("{table} record: {e}")))
}

#[derive(Deserialize)]
struct RowId<T> {
    id: T,
}

/// Typed change event, the only shape the reconciler folds
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new item
    ItemInserted(Item),
    /// Editable fields of an item changed
    ItemUpdated(Item),
    /// An item was deleted (its reservations and contributions go with it)
    ItemDeleted {
        /// Deleted item
        id: ItemId,
    },
    /// A new reservation
    ReservationInserted(Reservation),
    /// A reservation was released or cascaded away
    ReservationDeleted {
        /// Deleted reservation
        id: ReservationId,
    },
    /// A new contribution
    ContributionInserted(Contribution),
    /// A contribution was cascaded away
    ContributionDeleted {
        /// Deleted contribution
        id: ContributionId,
    },
}

impl ChangeEvent {
    /// Decode an untyped change
    ///
    /// Delete events only need the row id. Reservation and contribution
    /// updates are not part of the model and are rejected, as are list rows.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Decode`] for malformed rows or unsupported
    /// table/kind pairs.
    pub fn decode(change: RowChange) -> Result<Self, RemoteError> {
        let RowChange { table, kind, row } = change;
        match (table, kind) {
            (Table::Items, ChangeKind::Insert) => decode_row(table, row).map(Self::ItemInserted),
            (Table::Items, ChangeKind::Update) => decode_row(table, row).map(Self::ItemUpdated),
            (Table::Items, ChangeKind::Delete) => {
                decode_row::<RowId<ItemId>>(table, row).map(|r| Self::ItemDeleted { id: r.id })
            },
            (Table::Reservations, ChangeKind::Insert) => {
                decode_row(table, row).map(Self::ReservationInserted)
            },
            (Table::Reservations, ChangeKind::Delete) => decode_row::<RowId<ReservationId>>(table, row)
                .map(|r| Self::ReservationDeleted { id: r.id }),
            (Table::Contributions, ChangeKind::Insert) => {
                decode_row(table, row).map(Self::ContributionInserted)
            },
            (Table::Contributions, ChangeKind::Delete) => {
                decode_row::<RowId<ContributionId>>(table, row)
                    .map(|r| Self::ContributionDeleted { id: r.id })
            },
            (table, kind) => Err(RemoteError::Decode(format!(
                "unsupported change {kind:?} on {table}"
            ))),
        }
    }
}
