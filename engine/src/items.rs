//! Item repository.
//!
//! Owner-only writes of items. The repository does not check roles itself:
//! callers decide who may write, and the remote store is the real
//! authorization boundary.

use crate::error::{Result, ValidationError};
use crate::remote::{Filter, OrderBy, RemoteCollection, Table, decode_row, decode_rows, encode_row};
use crate::types::{Item, ItemId, ListId, Money};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Raw item form input, as typed by the owner
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    /// Item name
    pub name: String,
    /// Shop link
    pub url: String,
    /// Price text, e.g. `1999,90`
    pub price: String,
    /// Picture link
    pub image_url: String,
}

impl ItemDraft {
    /// Draft with just a name
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Set the price text
    #[must_use]
    pub fn with_price(mut self, price: &str) -> Self {
        self.price = price.to_string();
        self
    }

    /// Set the shop link
    #[must_use]
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Draft pre-filled from an existing item, for editing
    #[must_use]
    pub fn from_item(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            url: item.url.clone().unwrap_or_default(),
            price: item.price.map(|p| p.to_string()).unwrap_or_default(),
            image_url: item.image_url.clone().unwrap_or_default(),
        }
    }

    /// Check the form and turn it into storable fields
    ///
    /// Blank optional fields become absent.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MissingItemName`] for a blank name
    /// - [`ValidationError::InvalidPrice`] for a price that is not a
    ///   non-negative decimal
    pub fn validate(&self) -> std::result::Result<ItemFields, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingItemName);
        }
        let optional = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let price = match optional(&self.price) {
            Some(price) => Some(Money::parse(&price)?),
            None => None,
        };

        Ok(ItemFields {
            name: name.to_string(),
            url: optional(&self.url),
            price,
            image_url: optional(&self.image_url),
        })
    }
}

/// Validated editable fields of an item
///
/// Updates always resubmit every field; an absent value clears it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFields {
    /// Item name
    pub name: String,
    /// Shop link
    pub url: Option<String>,
    /// Price
    pub price: Option<Money>,
    /// Picture link
    pub image_url: Option<String>,
}

#[derive(Serialize)]
struct NewItem<'a> {
    list_id: ListId,
    #[serde(flatten)]
    fields: &'a ItemFields,
}

/// Item writes and reads for one remote store
#[derive(Clone)]
pub struct ItemRepository {
    remote: Arc<dyn RemoteCollection>,
}

impl ItemRepository {
    /// Repository over `remote`
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteCollection>) -> Self {
        Self { remote }
    }

    /// Items of a list, newest first
    ///
    /// # Errors
    ///
    /// Returns remote failures.
    pub async fn items_for_list(&self, list_id: ListId) -> Result<Vec<Item>> {
        let rows = self
            .remote
            .query(
                Table::Items,
                Filter::eq("list_id", list_id),
                Some(OrderBy::desc("created_at")),
            )
            .await?;
        Ok(decode_rows(Table::Items, rows)?)
    }

    /// Add an item to a list
    ///
    /// # Errors
    ///
    /// Returns remote failures; a deleted list is `NotFound`.
    pub async fn create(&self, list_id: ListId, fields: &ItemFields) -> Result<Item> {
        let record = encode_row(Table::Items, &NewItem { list_id, fields })?;
        let row = self.remote.insert(Table::Items, record).await?;
        let item: Item = decode_row(Table::Items, row)?;
        tracing::info!(item_id = %item.id, list_id = %list_id, "Item created");
        Ok(item)
    }

    /// Replace all editable fields of an item
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the item was deleted meanwhile, or other remote
    /// failures.
    pub async fn update(&self, item_id: ItemId, fields: &ItemFields) -> Result<Item> {
        let record = encode_row(Table::Items, fields)?;
        let row = self
            .remote
            .update(Table::Items, *item_id.as_uuid(), record)
            .await?;
        Ok(decode_row(Table::Items, row)?)
    }

    /// Delete an item; its reservations and contributions go with it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is already gone, or other remote failures.
    pub async fn delete(&self, item_id: ItemId) -> Result<()> {
        self.remote.delete(Table::Items, *item_id.as_uuid()).await?;
        tracing::info!(item_id = %item_id, "Item deleted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::CoordinationError;
    use crate::lists::ListDirectory;
    use crate::memory::InMemoryCollection;
    use crate::types::UserId;
    use wishlist_testing::SteppingClock;

    #[test]
    fn validate_trims_and_drops_blank_fields() {
        let fields = ItemDraft {
            name: "  Kettle ".into(),
            url: "   ".into(),
            price: "45,50".into(),
            image_url: "https://img/k.png".into(),
        }
        .validate()
        .unwrap();

        assert_eq!(fields.name, "Kettle");
        assert_eq!(fields.url, None);
        assert_eq!(fields.price, Some(Money::from_minor(4_550)));
        assert_eq!(fields.image_url.as_deref(), Some("https://img/k.png"));
    }

    #[test]
    fn validate_rejects_bad_input() {
        assert_eq!(
            ItemDraft::named(" ").validate(),
            Err(ValidationError::MissingItemName)
        );
        assert_eq!(
            ItemDraft::named("Kettle").with_price("-3").validate(),
            Err(ValidationError::InvalidPrice)
        );
        assert_eq!(
            ItemDraft::named("Kettle").with_price("cheap").validate(),
            Err(ValidationError::InvalidPrice)
        );
    }

    #[tokio::test]
    async fn create_update_delete_round() {
        let remote: Arc<dyn RemoteCollection> =
            Arc::new(InMemoryCollection::new(Arc::new(SteppingClock::default())));
        let list = ListDirectory::new(Arc::clone(&remote))
            .create_list(UserId::new(), "Birthday", None)
            .await
            .unwrap();
        let repository = ItemRepository::new(remote);

        let first = repository
            .create(list.id, &ItemDraft::named("Kettle").with_price("45").validate().unwrap())
            .await
            .unwrap();
        let second = repository
            .create(list.id, &ItemDraft::named("Mug").validate().unwrap())
            .await
            .unwrap();
        assert_eq!(first.price, Some(Money::from_units(45)));

        let edited = ItemDraft::from_item(&first);
        let edited = ItemDraft { price: String::new(), ..edited };
        let updated = repository.update(first.id, &edited.validate().unwrap()).await.unwrap();
        assert_eq!(updated.price, None);
        assert_eq!(updated.created_at, first.created_at);

        let items = repository.items_for_list(list.id).await.unwrap();
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        repository.delete(first.id).await.unwrap();
        assert!(matches!(
            repository.delete(first.id).await,
            Err(CoordinationError::NotFound { table: Table::Items, .. })
        ));
    }
}
