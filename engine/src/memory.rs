//! In-memory remote collection.
//!
//! Behaves like the hosted relational store the engine targets: it assigns
//! ids and creation times, checks foreign keys, cascades deletes, and fans
//! every committed change out to all open feeds. Several list views sharing
//! one `InMemoryCollection` behave like several browsers on one list.

use crate::remote::{
    ChangeFeed, ChangeKind, Filter, OrderBy, RemoteCollection, RemoteError, RemoteFuture, RowChange,
    Table,
};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;
use wishlist_core::environment::{Clock, SystemClock};
use wishlist_core::{DateTime, Utc};

/// Remote operations, used to target injected failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `query`
    Query,
    /// `insert`
    Insert,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `subscribe`
    Subscribe,
}

#[derive(Clone, Debug)]
enum FeedMessage {
    Change(RowChange),
    Interrupted,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<Table, Vec<Value>>,
    faults: HashMap<(Operation, Table), usize>,
}

impl Tables {
    fn table_rows(&self, table: Table) -> &[Value] {
        self.rows.get(&table).map(Vec::as_slice).unwrap_or_default()
    }

    fn exists(&self, table: Table, id: &Value) -> bool {
        self.table_rows(table).iter().any(|row| row.get("id") == Some(id))
    }

    fn take_fault(&mut self, operation: Operation, table: Table) -> Result<(), RemoteError> {
        if let Some(remaining) = self.faults.get_mut(&(operation, table)) {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(&(operation, table));
            }
            return Err(RemoteError::Transport(format!(
                "injected {operation:?} failure on {table}"
            )));
        }
        Ok(())
    }

    /// Remove row `id` and everything referencing it, children first
    fn remove_cascading(&mut self, table: Table, id: &Value, removed: &mut Vec<RowChange>) {
        let children: &[(Table, &str)] = match table {
            Table::Lists => &[(Table::Items, "list_id")],
            Table::Items => &[
                (Table::Reservations, "item_id"),
                (Table::Contributions, "item_id"),
            ],
            Table::Reservations | Table::Contributions => &[],
        };

        for (child, column) in children {
            let child_ids: Vec<Value> = self
                .table_rows(*child)
                .iter()
                .filter(|row| row.get(*column) == Some(id))
                .filter_map(|row| row.get("id").cloned())
                .collect();
            for child_id in child_ids {
                self.remove_cascading(*child, &child_id, removed);
            }
        }

        if let Some(rows) = self.rows.get_mut(&table) {
            if let Some(position) = rows.iter().position(|row| row.get("id") == Some(id)) {
                let row = rows.remove(position);
                removed.push(RowChange {
                    table,
                    kind: ChangeKind::Delete,
                    row,
                });
            }
        }
    }
}

/// Foreign key of each child table
const fn parent_of(table: Table) -> Option<(Table, &'static str)> {
    match table {
        Table::Lists => None,
        Table::Items => Some((Table::Lists, "list_id")),
        Table::Reservations | Table::Contributions => Some((Table::Items, "item_id")),
    }
}

/// Orders JSON values: timestamps chronologically, numbers numerically,
/// other strings lexically, nulls first
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (a.parse::<DateTime<Utc>>(), b.parse::<DateTime<Utc>>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        },
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// In-memory implementation of [`RemoteCollection`]
pub struct InMemoryCollection {
    tables: Mutex<Tables>,
    feed: broadcast::Sender<FeedMessage>,
    clock: Arc<dyn Clock>,
    unique_reservations: bool,
}

impl Default for InMemoryCollection {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryCollection {
    /// Empty store stamping rows with `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (feed, _) = broadcast::channel(1024);
        Self {
            tables: Mutex::new(Tables::default()),
            feed,
            clock,
            unique_reservations: false,
        }
    }

    /// Reject a second reservation for the same item with a conflict,
    /// like a unique index on `reservations.item_id`
    #[must_use]
    pub const fn with_unique_reservations(mut self) -> Self {
        self.unique_reservations = true;
        self
    }

    /// Make the next `times` calls of `operation` on `table` fail with a
    /// transport error
    pub fn inject_failure(&self, operation: Operation, table: Table, times: usize) {
        if times == 0 {
            return;
        }
        if let Ok(mut tables) = self.lock() {
            *tables.faults.entry((operation, table)).or_default() += times;
        }
    }

    /// Break every open feed, as a dropped connection would
    pub fn interrupt_feeds(&self) {
        let _ = self.feed.send(FeedMessage::Interrupted);
    }

    /// Number of rows currently in `table`
    #[must_use]
    pub fn row_count(&self, table: Table) -> usize {
        self.lock().map_or(0, |tables| tables.table_rows(table).len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RemoteError> {
        self.tables
            .lock()
            .map_err(|_| RemoteError::Transport("store lock poisoned".to_string()))
    }

    fn publish(&self, changes: Vec<RowChange>) {
        for change in changes {
            tracing::trace!(table = %change.table, kind = ?change.kind, "Publishing change");
            let _ = self.feed.send(FeedMessage::Change(change));
        }
    }

    fn query_now(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut tables = self.lock()?;
        tables.take_fault(Operation::Query, table)?;
        let mut rows: Vec<Value> = tables
            .table_rows(table)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                if order.descending { ordering.reverse() } else { ordering }
            });
        }
        Ok(rows)
    }

    fn insert_now(&self, table: Table, record: Value) -> Result<Value, RemoteError> {
        let Value::Object(mut fields) = record else {
            return Err(RemoteError::Decode(format!("{table} record must be an object")));
        };

        let mut tables = self.lock()?;
        tables.take_fault(Operation::Insert, table)?;

        if let Some((parent, column)) = parent_of(table) {
            let parent_id = fields.get(column).cloned().unwrap_or(Value::Null);
            if !tables.exists(parent, &parent_id) {
                return Err(RemoteError::NotFound {
                    table: parent,
                    id: parent_id.as_str().unwrap_or_default().to_string(),
                });
            }
            if self.unique_reservations
                && table == Table::Reservations
                && tables
                    .table_rows(table)
                    .iter()
                    .any(|row| row.get(column) == Some(&parent_id))
            {
                return Err(RemoteError::Conflict {
                    table,
                    reason: "item already has a reservation".to_string(),
                });
            }
        }

        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields.insert(
            "created_at".to_string(),
            Value::String(self.clock.now().to_rfc3339()),
        );
        let row = Value::Object(fields);
        tables.rows.entry(table).or_default().push(row.clone());
        drop(tables);

        self.publish(vec![RowChange {
            table,
            kind: ChangeKind::Insert,
            row: row.clone(),
        }]);
        Ok(row)
    }

    fn update_now(&self, table: Table, id: Uuid, fields: Value) -> Result<Value, RemoteError> {
        let Value::Object(fields) = fields else {
            return Err(RemoteError::Decode(format!("{table} fields must be an object")));
        };
        let key = Value::String(id.to_string());

        let mut tables = self.lock()?;
        tables.take_fault(Operation::Update, table)?;
        let row = tables
            .rows
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|row| row.get("id") == Some(&key)))
            .ok_or_else(|| RemoteError::NotFound {
                table,
                id: id.to_string(),
            })?;

        if let Value::Object(existing) = row {
            merge_fields(existing, fields);
        }
        let updated = row.clone();
        drop(tables);

        self.publish(vec![RowChange {
            table,
            kind: ChangeKind::Update,
            row: updated.clone(),
        }]);
        Ok(updated)
    }

    fn delete_now(&self, table: Table, id: Uuid) -> Result<(), RemoteError> {
        let key = Value::String(id.to_string());

        let mut tables = self.lock()?;
        tables.take_fault(Operation::Delete, table)?;
        if !tables.exists(table, &key) {
            return Err(RemoteError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        let mut removed = Vec::new();
        tables.remove_cascading(table, &key, &mut removed);
        drop(tables);

        self.publish(removed);
        Ok(())
    }

    fn subscribe_now(&self, table: Table, filter: Filter) -> Result<ChangeFeed, RemoteError> {
        self.lock()?.take_fault(Operation::Subscribe, table)?;
        let mut receiver = self.feed.subscribe();

        let feed = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(FeedMessage::Change(change)) => {
                        if change.table == table && filter.matches(&change.row) {
                            yield Ok(change);
                        }
                    },
                    Ok(FeedMessage::Interrupted) => {
                        yield Err(RemoteError::Transport("feed interrupted".to_string()));
                        break;
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(RemoteError::Transport(format!("feed lagged, {skipped} changes lost")));
                        break;
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(feed))
    }
}

/// Overwrite editable fields; `id` and `created_at` are owned by the store
fn merge_fields(existing: &mut Map<String, Value>, fields: Map<String, Value>) {
    for (key, value) in fields {
        if key != "id" && key != "created_at" {
            existing.insert(key, value);
        }
    }
}

impl RemoteCollection for InMemoryCollection {
    fn query(
        &self,
        table: Table,
        filter: Filter,
        order: Option<OrderBy>,
    ) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move { self.query_now(table, &filter, order.as_ref()) })
    }

    fn insert(&self, table: Table, record: Value) -> RemoteFuture<'_, Value> {
        Box::pin(async move { self.insert_now(table, record) })
    }

    fn update(&self, table: Table, id: Uuid, fields: Value) -> RemoteFuture<'_, Value> {
        Box::pin(async move { self.update_now(table, id, fields) })
    }

    fn delete(&self, table: Table, id: Uuid) -> RemoteFuture<'_, ()> {
        Box::pin(async move { self.delete_now(table, id) })
    }

    fn subscribe(&self, table: Table, filter: Filter) -> RemoteFuture<'_, ChangeFeed> {
        Box::pin(async move { self.subscribe_now(table, filter) })
    }
}
