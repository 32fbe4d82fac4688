//! Local state of one open list view.
//!
//! Collections are maps keyed by record id, so folding the same change twice
//! is a no-op. Deleted ids are remembered, so an insert echo arriving after
//! its delete never brings a row back.

use crate::error::CoordinationError;
use crate::projection::{ItemView, project_item};
use crate::remote::Table;
use crate::types::{
    ActionKind, Contribution, ContributionId, GuestActionRecord, Item, ItemId, List, ListId,
    Reservation, ReservationId, UserId, Viewer,
};
use chrono::{DateTime, Utc};
use futures::stream::AbortHandle;
use std::collections::{HashMap, HashSet};

/// Lifecycle of a list view
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Initial load in progress
    Loading,
    /// Loaded and following the change feeds
    Ready,
    /// The initial load failed for good
    Errored {
        /// Last load error
        error: CoordinationError,
    },
    /// Torn down; nothing is folded anymore
    Closed,
}

/// Which rows a subscription follows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedScope {
    /// Rows of the list itself (items)
    List,
    /// Rows of the items known when the view became ready
    KnownItems,
    /// Rows of one item added later
    Item(ItemId),
}

/// One change-feed subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Feed {
    /// Followed table
    pub table: Table,
    /// Followed rows
    pub scope: FeedScope,
}

impl Feed {
    /// Subscription key
    #[must_use]
    pub const fn new(table: Table, scope: FeedScope) -> Self {
        Self { table, scope }
    }
}

/// Tells a guest that something they did was voided by an item deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Deleted item
    pub item_id: ItemId,
    /// Its name, when the view still knew it
    pub item_name: Option<String>,
    /// Kinds of the guest's voided actions
    pub voided: Vec<ActionKind>,
    /// When the notice was raised
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    /// Text shown to the guest
    #[must_use]
    pub fn message(&self) -> String {
        let subject = self
            .item_name
            .as_deref()
            .map_or_else(|| "An item".to_string(), |name| format!("\"{name}\""));
        let claimed = self.voided.contains(&ActionKind::Claim);
        let contributed = self.voided.contains(&ActionKind::Contribute);
        let consequence = match (claimed, contributed) {
            (true, true) => {
                "your reservation was cancelled and your contribution was virtually returned"
            },
            (true, false) => "your reservation was cancelled",
            (false, _) => "your contribution was virtually returned",
        };
        format!("{subject} was removed by the list owner: {consequence}.")
    }
}

/// Everything the initial load brings in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// The list
    pub list: List,
    /// Role of the viewer on this list
    pub viewer: Viewer,
    /// Items, newest first
    pub items: Vec<Item>,
    /// Reservations of those items
    pub reservations: Vec<Reservation>,
    /// Contributions to those items
    pub contributions: Vec<Contribution>,
    /// The guest's journal entries for this list
    pub guest_actions: Vec<GuestActionRecord>,
}

/// Local view state for one list
#[derive(Clone, Debug)]
pub struct ListViewState {
    /// Viewed list
    pub list_id: ListId,
    /// Signed-in account, if any
    pub current_user: Option<UserId>,
    /// Lifecycle phase
    pub phase: Phase,
    /// List details once loaded
    pub list: Option<List>,
    /// Role of the viewer
    pub viewer: Viewer,
    /// Known items by id
    pub items: HashMap<ItemId, Item>,
    /// Known reservations by id
    pub reservations: HashMap<ReservationId, Reservation>,
    /// Known contributions by id
    pub contributions: HashMap<ContributionId, Contribution>,
    /// The guest's journal entries for this list
    pub guest_actions: Vec<GuestActionRecord>,
    /// Unacknowledged reconciliation notices
    pub notices: Vec<Notice>,
    /// Error of the last failed operation, cleared by the next success
    pub last_error: Option<CoordinationError>,
    /// Subscriptions requested but not yet confirmed
    pub opening_feeds: HashSet<Feed>,
    /// Confirmed subscriptions
    pub live_feeds: HashSet<Feed>,
    /// Subscriptions that broke; they are not reopened
    pub stale_feeds: HashSet<Feed>,
    pub(crate) deleted_items: HashSet<ItemId>,
    pub(crate) deleted_reservations: HashSet<ReservationId>,
    pub(crate) deleted_contributions: HashSet<ContributionId>,
    /// Stops the per-item subscriptions when their item goes away
    pub(crate) feed_handles: HashMap<Feed, AbortHandle>,
}

impl ListViewState {
    /// Fresh state for a view that is about to load
    #[must_use]
    pub fn new(list_id: ListId, current_user: Option<UserId>) -> Self {
        Self {
            list_id,
            current_user,
            phase: Phase::Loading,
            list: None,
            viewer: Viewer::Guest { name: None },
            items: HashMap::new(),
            reservations: HashMap::new(),
            contributions: HashMap::new(),
            guest_actions: Vec::new(),
            notices: Vec::new(),
            last_error: None,
            opening_feeds: HashSet::new(),
            live_feeds: HashSet::new(),
            stale_feeds: HashSet::new(),
            deleted_items: HashSet::new(),
            deleted_reservations: HashSet::new(),
            deleted_contributions: HashSet::new(),
            feed_handles: HashMap::new(),
        }
    }

    /// Whether commands are accepted
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Loaded (or failed) and every requested subscription confirmed
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.phase != Phase::Loading && self.opening_feeds.is_empty()
    }

    /// Items newest first (ties broken by id)
    #[must_use]
    pub fn items_ordered(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.items.values().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Reservations of one item
    pub fn reservations_for(&self, item_id: ItemId) -> impl Iterator<Item = &Reservation> + '_ {
        self.reservations.values().filter(move |r| r.item_id == item_id)
    }

    /// Contributions to one item
    pub fn contributions_for(&self, item_id: ItemId) -> impl Iterator<Item = &Contribution> + '_ {
        self.contributions.values().filter(move |c| c.item_id == item_id)
    }

    /// Whether deleting the item would void someone's claim or contribution
    #[must_use]
    pub fn has_activity(&self, item_id: ItemId) -> bool {
        self.reservations_for(item_id).next().is_some()
            || self.contributions_for(item_id).next().is_some()
    }

    /// Projection of one item
    #[must_use]
    pub fn view_of(&self, item_id: ItemId) -> Option<ItemView> {
        self.items.get(&item_id).map(|item| {
            project_item(
                item,
                self.reservations_for(item_id),
                self.contributions_for(item_id),
                &self.viewer,
            )
        })
    }

    /// Projection of every item, newest first
    #[must_use]
    pub fn views(&self) -> Vec<ItemView> {
        self.items_ordered()
            .into_iter()
            .map(|item| {
                project_item(
                    item,
                    self.reservations_for(item.id),
                    self.contributions_for(item.id),
                    &self.viewer,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wishlist_testing::epoch;

    fn item(list_id: ListId, name: &str, minute: i64) -> Item {
        Item {
            id: ItemId::new(),
            list_id,
            name: name.into(),
            url: None,
            price: None,
            image_url: None,
            created_at: epoch() + Duration::minutes(minute),
        }
    }

    #[test]
    fn items_are_newest_first() {
        let list_id = ListId::new();
        let mut state = ListViewState::new(list_id, None);
        for (name, minute) in [("old", 1), ("new", 3), ("mid", 2)] {
            let item = item(list_id, name, minute);
            state.items.insert(item.id, item);
        }
        let names: Vec<&str> = state.items_ordered().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
    }

    #[test]
    fn activity_counts_reservations_and_contributions() {
        let list_id = ListId::new();
        let mut state = ListViewState::new(list_id, None);
        let kettle = item(list_id, "kettle", 0);
        let kettle_id = kettle.id;
        state.items.insert(kettle.id, kettle);
        assert!(!state.has_activity(kettle_id));

        let reservation = Reservation {
            id: ReservationId::new(),
            item_id: kettle_id,
            reserver_name: "Ann".into(),
            created_at: epoch(),
        };
        state.reservations.insert(reservation.id, reservation);
        assert!(state.has_activity(kettle_id));
    }

    #[test]
    fn notice_text_names_the_voided_actions() {
        let mut notice = Notice {
            item_id: ItemId::new(),
            item_name: Some("Kettle".into()),
            voided: vec![ActionKind::Claim],
            raised_at: epoch(),
        };
        assert_eq!(
            notice.message(),
            "\"Kettle\" was removed by the list owner: your reservation was cancelled."
        );

        notice.item_name = None;
        notice.voided = vec![ActionKind::Contribute];
        assert_eq!(
            notice.message(),
            "An item was removed by the list owner: your contribution was virtually returned."
        );
    }
}
