//! List directory: the owner's dashboard of lists.

use crate::error::{CoordinationError, Result, ValidationError};
use crate::remote::{Filter, OrderBy, RemoteCollection, Table, decode_row, decode_rows};
use crate::types::{List, ListId, UserId};
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;

/// Creates and finds lists
#[derive(Clone)]
pub struct ListDirectory {
    remote: Arc<dyn RemoteCollection>,
}

impl ListDirectory {
    /// Directory over `remote`
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteCollection>) -> Self {
        Self { remote }
    }

    /// Create a list owned by `owner`
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MissingListTitle`] for a blank title
    /// - remote failures
    #[tracing::instrument(skip(self, title))]
    pub async fn create_list(
        &self,
        owner: UserId,
        title: &str,
        event_date: Option<NaiveDate>,
    ) -> Result<List> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingListTitle.into());
        }

        let row = self
            .remote
            .insert(
                Table::Lists,
                json!({ "title": title, "event_date": event_date, "owner_id": owner }),
            )
            .await?;
        let list: List = decode_row(Table::Lists, row)?;
        tracing::info!(list_id = %list.id, "List created");
        Ok(list)
    }

    /// Lists owned by `owner`, newest first
    ///
    /// # Errors
    ///
    /// Returns remote failures.
    pub async fn lists_for_owner(&self, owner: UserId) -> Result<Vec<List>> {
        let rows = self
            .remote
            .query(
                Table::Lists,
                Filter::eq("owner_id", owner),
                Some(OrderBy::desc("created_at")),
            )
            .await?;
        Ok(decode_rows(Table::Lists, rows)?)
    }

    /// One list by id
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::NotFound`] when the list does not exist.
    pub async fn find_list(&self, id: ListId) -> Result<List> {
        find_list(self.remote.as_ref(), id).await
    }
}

pub(crate) async fn find_list(remote: &dyn RemoteCollection, id: ListId) -> Result<List> {
    let row = remote
        .query(Table::Lists, Filter::eq("id", id), None)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CoordinationError::NotFound {
            table: Table::Lists,
            id: id.to_string(),
        })?;
    Ok(decode_row(Table::Lists, row)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCollection;
    use wishlist_testing::SteppingClock;

    fn directory() -> ListDirectory {
        ListDirectory::new(Arc::new(InMemoryCollection::new(Arc::new(
            SteppingClock::default(),
        ))))
    }

    #[tokio::test]
    async fn creates_and_lists_newest_first() {
        let directory = directory();
        let owner = UserId::new();
        let first = directory.create_list(owner, " Birthday ", None).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 12, 24);
        let second = directory.create_list(owner, "Christmas", date).await.unwrap();
        directory.create_list(UserId::new(), "Someone else", None).await.unwrap();

        assert_eq!(first.title, "Birthday");
        assert_eq!(second.event_date, date);
        let lists = directory.lists_for_owner(owner).await.unwrap();
        assert_eq!(lists, vec![second.clone(), first]);
        assert_eq!(directory.find_list(second.id).await.unwrap(), second);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let result = directory().create_list(UserId::new(), "  ", None).await;
        assert_eq!(
            result,
            Err(CoordinationError::Validation(ValidationError::MissingListTitle))
        );
    }

    #[tokio::test]
    async fn missing_list_is_not_found() {
        let result = directory().find_list(ListId::new()).await;
        assert!(matches!(result, Err(CoordinationError::NotFound { table: Table::Lists, .. })));
    }
}
