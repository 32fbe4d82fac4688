//! One open list view, driven through a [`Store`].
//!
//! A session owns the store running [`ListViewReducer`]. Commands are sent
//! with a fresh [`OperationId`] and the session waits for the matching
//! result action, so callers get a plain `Result` back.

use crate::error::{CoordinationError, Result};
use crate::items::ItemDraft;
use crate::projection::ItemView;
use crate::reconciler::{ListViewAction, ListViewEnvironment, ListViewReducer, Outcome};
use crate::state::{ListViewState, Notice, Phase};
use crate::types::{ItemId, ListId, OperationId, UserId};
use std::time::Duration;
use wishlist_runtime::Store;

type ListViewStore = Store<ListViewState, ListViewAction, ListViewEnvironment, ListViewReducer>;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl Outcome {
    /// Item the outcome refers to
    #[must_use]
    pub const fn item_id(&self) -> Option<ItemId> {
        match self {
            Self::Claimed { item_id, .. }
            | Self::AlreadyHeld { item_id }
            | Self::Released { item_id, .. }
            | Self::NothingToRelease { item_id }
            | Self::Contributed { item_id, .. }
            | Self::ItemDeleted { item_id } => Some(*item_id),
            Self::ItemCreated { item } | Self::ItemUpdated { item } => Some(item.id),
            Self::NameSaved | Self::Skipped => None,
        }
    }

    /// Whether the view has folded the change-feed echo of this write
    ///
    /// Always true once a subscription was lost, since the echo may never
    /// arrive.
    #[must_use]
    pub fn is_reflected_in(&self, state: &ListViewState) -> bool {
        if state.phase == Phase::Closed || !state.stale_feeds.is_empty() {
            return true;
        }
        match self {
            Self::Claimed { reservation, .. } => {
                state.reservations.contains_key(&reservation.id)
                    || state.deleted_reservations.contains(&reservation.id)
                    || state.deleted_items.contains(&reservation.item_id)
            },
            Self::Released { reservations, .. } => reservations
                .iter()
                .all(|id| !state.reservations.contains_key(id)),
            Self::Contributed { contribution, .. } => {
                state.contributions.contains_key(&contribution.id)
                    || state.deleted_contributions.contains(&contribution.id)
                    || state.deleted_items.contains(&contribution.item_id)
            },
            Self::ItemCreated { item } => {
                state.items.contains_key(&item.id) || state.deleted_items.contains(&item.id)
            },
            Self::ItemUpdated { item } => state
                .items
                .get(&item.id)
                .is_none_or(|known| known == item),
            Self::ItemDeleted { item_id } => !state.items.contains_key(item_id),
            Self::AlreadyHeld { .. } | Self::NothingToRelease { .. } | Self::NameSaved | Self::Skipped => {
                true
            },
        }
    }
}

/// A loaded, live view of one list
pub struct ListViewSession {
    store: ListViewStore,
    list_id: ListId,
    timeout: Duration,
}

impl ListViewSession {
    /// Load a list and start following its changes
    ///
    /// Returns once the snapshot is applied and every subscription is
    /// confirmed (or already lost).
    ///
    /// # Errors
    ///
    /// Returns the load error (e.g. `NotFound` for an unknown list) once the
    /// retries are used up.
    #[tracing::instrument(skip(env))]
    pub async fn open(
        env: ListViewEnvironment,
        list_id: ListId,
        current_user: Option<UserId>,
    ) -> Result<Self> {
        let timeout = env.config.request_timeout;
        let store_config = env.config.store_config();
        let store = Store::with_config(
            ListViewState::new(list_id, current_user),
            ListViewReducer::new(),
            env,
            store_config,
        );
        let session = Self {
            store,
            list_id,
            timeout,
        };

        let loaded = session
            .store
            .send_and_wait_for(
                ListViewAction::Open,
                |action| {
                    matches!(
                        action,
                        ListViewAction::Loaded(_) | ListViewAction::LoadFailed { .. }
                    )
                },
                timeout,
            )
            .await?;
        if let ListViewAction::LoadFailed { error } = loaded {
            session.store.close().await;
            return Err(error);
        }

        session.until(|_| true).await?;
        Ok(session)
    }

    /// Viewed list
    #[must_use]
    pub const fn list_id(&self) -> ListId {
        self.list_id
    }

    async fn run<F>(&self, command: F) -> Result<Outcome>
    where
        F: FnOnce(OperationId) -> ListViewAction,
    {
        let op = OperationId::new();
        let reply = self
            .store
            .send_and_wait_for(
                command(op),
                |action| action.result_for(op).is_some(),
                self.timeout,
            )
            .await?;
        let outcome = reply
            .result_for(op)
            .unwrap_or_else(|| Err(CoordinationError::Remote("unmatched reply".to_string())))?;

        // Read-your-writes: hand the result back once the view shows it.
        if let Err(e) = self.until(|state| outcome.is_reflected_in(state)).await {
            tracing::warn!(op = %op, error = %e, "Write succeeded but its change never arrived");
        }
        Ok(outcome)
    }

    /// Remember the guest's display name
    ///
    /// # Errors
    ///
    /// `MissingGuestName` for a blank name.
    pub async fn set_guest_name(&self, name: &str) -> Result<Outcome> {
        let name = name.to_string();
        self.run(|op| ListViewAction::SetGuestName { op, name }).await
    }

    /// Reserve an item for the current guest
    ///
    /// # Errors
    ///
    /// `AlreadyClaimed` when someone else holds it, `MissingGuestName`
    /// without a name, remote failures otherwise.
    pub async fn claim(&self, item_id: ItemId) -> Result<Outcome> {
        self.run(|op| ListViewAction::Claim { op, item_id }).await
    }

    /// Give up the current guest's reservation
    ///
    /// # Errors
    ///
    /// Remote failures; releasing twice is not an error.
    pub async fn release(&self, item_id: ItemId) -> Result<Outcome> {
        self.run(|op| ListViewAction::Release { op, item_id }).await
    }

    /// Pledge `amount` (as typed) toward an item
    ///
    /// # Errors
    ///
    /// The first violated funding rule, or a remote failure.
    pub async fn contribute(&self, item_id: ItemId, amount: &str) -> Result<Outcome> {
        let amount = amount.to_string();
        self.run(|op| ListViewAction::Contribute { op, item_id, amount })
            .await
    }

    /// Add an item (owner only)
    ///
    /// # Errors
    ///
    /// Validation errors for the draft, or a remote failure.
    pub async fn create_item(&self, draft: ItemDraft) -> Result<Outcome> {
        self.run(|op| ListViewAction::CreateItem { op, draft }).await
    }

    /// Edit an item (owner only)
    ///
    /// # Errors
    ///
    /// Validation errors for the draft, `NotFound`, or a remote failure.
    pub async fn update_item(&self, item_id: ItemId, draft: ItemDraft) -> Result<Outcome> {
        self.run(|op| ListViewAction::UpdateItem { op, item_id, draft })
            .await
    }

    /// Remove an item and everything attached to it (owner only)
    ///
    /// # Errors
    ///
    /// `NotFound` or a remote failure.
    pub async fn delete_item(&self, item_id: ItemId) -> Result<Outcome> {
        self.run(|op| ListViewAction::DeleteItem { op, item_id }).await
    }

    /// Wait until the view is settled and `predicate` holds
    ///
    /// # Errors
    ///
    /// Returns a retryable remote error when the request timeout passes first.
    pub async fn until<P>(&self, predicate: P) -> Result<()>
    where
        P: Fn(&ListViewState) -> bool,
    {
        tokio::time::timeout(self.timeout, async {
            while !self
                .store
                .state(|state| state.is_settled() && predicate(state))
                .await
            {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| CoordinationError::Remote("timed out waiting for the list view".to_string()))
    }

    /// Read the local state
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&ListViewState) -> T,
    {
        self.store.state(f).await
    }

    /// Current projection of every item, newest first
    pub async fn views(&self) -> Vec<ItemView> {
        self.store.state(ListViewState::views).await
    }

    /// Projection of one item
    pub async fn view_of(&self, item_id: ItemId) -> Option<ItemView> {
        self.store.state(|state| state.view_of(item_id)).await
    }

    /// Whether deleting the item would void claims or contributions
    pub async fn has_activity(&self, item_id: ItemId) -> bool {
        self.store.state(|state| state.has_activity(item_id)).await
    }

    /// Pending reconciliation notices
    pub async fn notices(&self) -> Vec<Notice> {
        self.store.state(|state| state.notices.clone()).await
    }

    /// Acknowledge every pending notice
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub async fn dismiss_notices(&self) -> Result<()> {
        self.store.send(ListViewAction::DismissNotices).await?;
        Ok(())
    }

    /// Lifecycle phase
    pub async fn phase(&self) -> Phase {
        self.store.state(|state| state.phase.clone()).await
    }

    /// Error of the last failed operation
    pub async fn last_error(&self) -> Option<CoordinationError> {
        self.store.state(|state| state.last_error.clone()).await
    }

    /// Stop following changes
    ///
    /// Subscriptions are dropped; results of writes still in flight are
    /// discarded. Closing twice is harmless.
    pub async fn close(&self) {
        if self.store.send(ListViewAction::Close).await.is_err() {
            return;
        }
        self.store.close().await;
    }
}
