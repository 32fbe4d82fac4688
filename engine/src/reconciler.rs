//! Realtime reconciler for one open list.
//!
//! [`ListViewReducer`] owns the local view of a list: it runs the initial
//! load, opens the change-feed subscriptions, folds incoming changes into
//! [`ListViewState`] and turns guest and owner commands into coordinator
//! writes. Every remote call happens inside an effect; the reducer itself
//! never blocks.
//!
//! # Flow
//!
//! ```text
//! Open ──► load (with retries) ──► Loaded ──► subscribe items, reservations, contributions
//!                              └─► LoadFailed (Errored)
//!
//! FeedOpened    ──► re-query the feed's rows once, folded like changes
//! Change(event) ──► fold, idempotent by record id
//! ItemDeleted   ──► cascade locally, drop the item's subscriptions,
//!                   void the guest's journal entries, raise one notice
//! ```
//!
//! Rows written after a query but before its subscription is confirmed are
//! picked up by the catch-up query that follows `FeedOpened`.

use crate::claims::{ClaimCoordinator, ClaimDecision, check_claim, held_by};
use crate::config::EngineConfig;
use crate::error::{CoordinationError, Result, ValidationError};
use crate::funding::{FundingCoordinator, check_contribution, parse_amount};
use crate::guest::GuestIdentityStore;
use crate::items::{ItemDraft, ItemRepository};
use crate::lists::find_list;
use crate::remote::{
    ChangeEvent, ChangeKind, Filter, OrderBy, RemoteCollection, RemoteError, RowChange, Table,
    decode_rows,
};
use crate::state::{Feed, FeedScope, ListViewState, Notice, Phase, Snapshot};
use crate::types::{
    ActionKind, Contribution, GuestActionRecord, GuestName, Item, ItemId, ListId, OperationId,
    Reservation, ReservationId, UserId, Viewer,
};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use wishlist_core::effect::Effect;
use wishlist_core::environment::{Clock, SystemClock};
use wishlist_core::reducer::Reducer;
use wishlist_core::{SmallVec, async_effect, smallvec, stream_effect};
use wishlist_runtime::retry_with_backoff;

type Effects = SmallVec<[Effect<ListViewAction>; 4]>;

/// Result of a successful command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A reservation was written
    Claimed {
        /// Claimed item
        item_id: ItemId,
        /// New reservation
        reservation: Reservation,
    },
    /// The guest already held the item
    AlreadyHeld {
        /// Held item
        item_id: ItemId,
    },
    /// The guest's reservations were deleted
    Released {
        /// Released item
        item_id: ItemId,
        /// Deleted reservations
        reservations: Vec<ReservationId>,
    },
    /// The guest held nothing on the item
    NothingToRelease {
        /// Item in question
        item_id: ItemId,
    },
    /// A contribution was written
    Contributed {
        /// Funded item
        item_id: ItemId,
        /// New contribution
        contribution: Contribution,
    },
    /// The owner added an item
    ItemCreated {
        /// New item
        item: Item,
    },
    /// The owner edited an item
    ItemUpdated {
        /// Item as stored
        item: Item,
    },
    /// The owner removed an item
    ItemDeleted {
        /// Removed item
        item_id: ItemId,
    },
    /// The guest's display name was stored
    NameSaved,
    /// The command does not apply to the viewer's role
    Skipped,
}

/// Everything that can happen to a list view
#[derive(Clone, Debug)]
pub enum ListViewAction {
    // ═══════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════
    /// Start the initial load
    Open,
    /// The initial load finished
    Loaded(Box<Snapshot>),
    /// The initial load failed after its retries
    LoadFailed {
        /// Last error
        error: CoordinationError,
    },
    /// A subscription was confirmed by the store
    FeedOpened {
        /// The subscription
        feed: Feed,
    },
    /// A subscription broke or ended
    FeedLost {
        /// The subscription
        feed: Feed,
        /// What happened
        reason: String,
    },
    /// A row change arrived on a subscription
    Change(ChangeEvent),
    /// Rows a confirmed subscription may have missed while it was opening
    CaughtUp {
        /// The subscription
        feed: Feed,
        /// Current rows, as inserts
        events: Vec<ChangeEvent>,
    },
    /// Acknowledge every pending notice
    DismissNotices,
    /// Tear the view down
    Close,

    // ═══════════════════════════════════════════════════════════
    // Guest commands
    // ═══════════════════════════════════════════════════════════
    /// Pick a display name
    SetGuestName {
        /// Correlation id
        op: OperationId,
        /// Name as typed
        name: String,
    },
    /// Reserve an item
    Claim {
        /// Correlation id
        op: OperationId,
        /// Item to reserve
        item_id: ItemId,
    },
    /// Give up a reservation
    Release {
        /// Correlation id
        op: OperationId,
        /// Reserved item
        item_id: ItemId,
    },
    /// Pledge money toward an item
    Contribute {
        /// Correlation id
        op: OperationId,
        /// Funded item
        item_id: ItemId,
        /// Amount as typed
        amount: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Owner commands
    // ═══════════════════════════════════════════════════════════
    /// Add an item
    CreateItem {
        /// Correlation id
        op: OperationId,
        /// Form input
        draft: ItemDraft,
    },
    /// Edit an item
    UpdateItem {
        /// Correlation id
        op: OperationId,
        /// Edited item
        item_id: ItemId,
        /// Form input
        draft: ItemDraft,
    },
    /// Remove an item
    DeleteItem {
        /// Correlation id
        op: OperationId,
        /// Removed item
        item_id: ItemId,
    },

    // ═══════════════════════════════════════════════════════════
    // Command results
    // ═══════════════════════════════════════════════════════════
    /// A command finished
    OperationSucceeded {
        /// Correlation id
        op: OperationId,
        /// What happened
        outcome: Outcome,
    },
    /// A command was rejected or its write failed
    OperationFailed {
        /// Correlation id
        op: OperationId,
        /// Why
        error: CoordinationError,
    },
}

impl ListViewAction {
    /// Result action for a finished command
    #[must_use]
    pub fn completed(op: OperationId, result: Result<Outcome>) -> Self {
        match result {
            Ok(outcome) => Self::OperationSucceeded { op, outcome },
            Err(error) => Self::OperationFailed { op, error },
        }
    }

    /// The command result carried by this action, if it answers `op`
    #[must_use]
    pub fn result_for(&self, op: OperationId) -> Option<Result<Outcome>> {
        match self {
            Self::OperationSucceeded { op: done, outcome } if *done == op => Some(Ok(outcome.clone())),
            Self::OperationFailed { op: done, error } if *done == op => Some(Err(error.clone())),
            _ => None,
        }
    }
}

/// Dependencies of a list view
#[derive(Clone)]
pub struct ListViewEnvironment {
    /// Remote relational store
    pub remote: Arc<dyn RemoteCollection>,
    /// Client-local guest identity
    pub guests: Arc<dyn GuestIdentityStore>,
    /// Clock for notice timestamps
    pub clock: Arc<dyn Clock>,
    /// Engine settings
    pub config: EngineConfig,
}

impl ListViewEnvironment {
    /// Environment with the system clock and default settings
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteCollection>, guests: Arc<dyn GuestIdentityStore>) -> Self {
        Self {
            remote,
            guests,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the settings
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    fn claims(&self) -> ClaimCoordinator {
        ClaimCoordinator::new(Arc::clone(&self.remote), Arc::clone(&self.guests))
    }

    fn funding(&self) -> FundingCoordinator {
        FundingCoordinator::new(Arc::clone(&self.remote), Arc::clone(&self.guests))
    }

    fn items(&self) -> ItemRepository {
        ItemRepository::new(Arc::clone(&self.remote))
    }
}

/// Read everything a view needs to start
///
/// # Errors
///
/// Returns `NotFound` for an unknown list, or the remote failure.
pub async fn load_snapshot(
    remote: &dyn RemoteCollection,
    guests: &dyn GuestIdentityStore,
    list_id: ListId,
    current_user: Option<UserId>,
) -> Result<Snapshot> {
    let list = find_list(remote, list_id).await?;

    let rows = remote
        .query(
            Table::Items,
            Filter::eq("list_id", list_id),
            Some(OrderBy::desc("created_at")),
        )
        .await?;
    let items: Vec<Item> = decode_rows(Table::Items, rows)?;
    let item_ids: Vec<ItemId> = items.iter().map(|item| item.id).collect();

    let rows = remote
        .query(
            Table::Reservations,
            Filter::any_of("item_id", &item_ids),
            Some(OrderBy::asc("created_at")),
        )
        .await?;
    let reservations = decode_rows(Table::Reservations, rows)?;

    let rows = remote
        .query(
            Table::Contributions,
            Filter::any_of("item_id", &item_ids),
            Some(OrderBy::asc("created_at")),
        )
        .await?;
    let contributions = decode_rows(Table::Contributions, rows)?;

    let viewer = Viewer::resolve(&list, current_user, guests);
    let guest_actions = if viewer.is_owner() {
        Vec::new()
    } else {
        guests.list_actions(list_id)
    };

    Ok(Snapshot {
        list,
        viewer,
        items,
        reservations,
        contributions,
        guest_actions,
    })
}

/// Actions produced by one change-feed subscription
///
/// Emits `FeedOpened` once the store accepted the subscription, then one
/// `Change` per decodable row change, and finally `FeedLost` when the feed
/// breaks or ends. Undecodable changes are logged and skipped.
fn feed_actions(
    remote: Arc<dyn RemoteCollection>,
    feed: Feed,
    filter: Filter,
) -> impl Stream<Item = ListViewAction> + Send + 'static {
    async_stream::stream! {
        let mut changes = match remote.subscribe(feed.table, filter).await {
            Ok(changes) => changes,
            Err(e) => {
                yield ListViewAction::FeedLost { feed, reason: e.to_string() };
                return;
            },
        };
        yield ListViewAction::FeedOpened { feed };

        while let Some(change) = changes.next().await {
            match change.and_then(ChangeEvent::decode) {
                Ok(event) => yield ListViewAction::Change(event),
                Err(RemoteError::Decode(reason)) => {
                    tracing::warn!(table = %feed.table, reason = %reason, "Skipping undecodable change");
                },
                Err(e) => {
                    yield ListViewAction::FeedLost { feed, reason: e.to_string() };
                    return;
                },
            }
        }
        yield ListViewAction::FeedLost { feed, reason: "feed ended".to_string() };
    }
}

/// Current rows behind a subscription, as insert events
async fn catch_up(
    remote: &dyn RemoteCollection,
    table: Table,
    filter: Filter,
) -> std::result::Result<Vec<ChangeEvent>, RemoteError> {
    let rows = remote
        .query(table, filter, Some(OrderBy::asc("created_at")))
        .await?;
    rows.into_iter()
        .map(|row| {
            ChangeEvent::decode(RowChange {
                table,
                kind: ChangeKind::Insert,
                row,
            })
        })
        .collect()
}

/// Reducer of one list view
#[derive(Clone, Debug, Default)]
pub struct ListViewReducer;

impl ListViewReducer {
    /// Creates the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reply(op: OperationId, result: Result<Outcome>) -> Effects {
        smallvec![async_effect! { Some(ListViewAction::completed(op, result)) }]
    }

    fn reject(op: OperationId, error: CoordinationError) -> Effects {
        tracing::debug!(op = %op, category = error.category(), error = %error, "Command rejected");
        Self::reply(op, Err(error))
    }

    fn skip(op: OperationId, command: &str) -> Effects {
        tracing::debug!(op = %op, command, "Command does not apply to this viewer");
        Self::reply(op, Ok(Outcome::Skipped))
    }

    fn not_found(item_id: ItemId) -> CoordinationError {
        CoordinationError::NotFound {
            table: Table::Items,
            id: item_id.to_string(),
        }
    }

    fn ready(state: &ListViewState) -> Result<()> {
        match state.phase {
            Phase::Ready => Ok(()),
            Phase::Closed => Err(CoordinationError::Closed),
            Phase::Loading | Phase::Errored { .. } => Err(CoordinationError::NotReady),
        }
    }

    fn guest_name(state: &ListViewState) -> Result<GuestName> {
        state
            .viewer
            .guest_name()
            .cloned()
            .ok_or_else(|| ValidationError::MissingGuestName.into())
    }

    /// Subscription effect, registered as opening
    ///
    /// Per-item subscriptions keep an abort handle so they end with their item.
    fn follow(state: &mut ListViewState, env: &ListViewEnvironment, feed: Feed, filter: Filter) -> Effect<ListViewAction> {
        state.opening_feeds.insert(feed);
        let actions = feed_actions(Arc::clone(&env.remote), feed, filter);
        if let FeedScope::Item(_) = feed.scope {
            let (actions, handle) = futures::stream::abortable(actions);
            state.feed_handles.insert(feed, handle);
            return stream_effect!(actions);
        }
        stream_effect!(actions)
    }

    /// Stop the subscriptions of a deleted item
    fn unfollow_item(state: &mut ListViewState, item_id: ItemId) {
        for table in [Table::Reservations, Table::Contributions] {
            let feed = Feed::new(table, FeedScope::Item(item_id));
            if let Some(handle) = state.feed_handles.remove(&feed) {
                handle.abort();
            }
            state.opening_feeds.remove(&feed);
            state.live_feeds.remove(&feed);
            state.stale_feeds.remove(&feed);
        }
    }

    /// Whether the feed belonged to an item that is gone
    fn is_dropped(state: &ListViewState, feed: Feed) -> bool {
        matches!(feed.scope, FeedScope::Item(item_id) if state.deleted_items.contains(&item_id))
    }

    /// Re-read what a just-confirmed subscription follows
    fn catch_up(state: &ListViewState, env: &ListViewEnvironment, feed: Feed) -> Effects {
        let filter = match feed.scope {
            FeedScope::List => Filter::eq("list_id", state.list_id),
            FeedScope::KnownItems => Filter::any_of("item_id", state.items.keys()),
            FeedScope::Item(item_id) => Filter::eq("item_id", item_id),
        };
        let remote = Arc::clone(&env.remote);
        smallvec![async_effect! {
            match catch_up(remote.as_ref(), feed.table, filter).await {
                Ok(events) => Some(ListViewAction::CaughtUp { feed, events }),
                Err(e) => {
                    tracing::warn!(?feed, error = %e, "Catch-up query failed");
                    None
                },
            }
        }]
    }

    /// Subscriptions for the rows of one newly seen item
    fn follow_item(state: &mut ListViewState, env: &ListViewEnvironment, item_id: ItemId) -> Effects {
        smallvec![
            Self::follow(
                state,
                env,
                Feed::new(Table::Reservations, FeedScope::Item(item_id)),
                Filter::eq("item_id", item_id),
            ),
            Self::follow(
                state,
                env,
                Feed::new(Table::Contributions, FeedScope::Item(item_id)),
                Filter::eq("item_id", item_id),
            ),
        ]
    }

    /// Drop the guest's journal entries for a removed item and raise a notice
    ///
    /// At most one notice exists per item, however often the deletion is
    /// observed.
    fn void_actions(
        state: &mut ListViewState,
        env: &ListViewEnvironment,
        item_id: ItemId,
        item_name: Option<String>,
    ) -> Effects {
        let (voided, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.guest_actions)
            .into_iter()
            .partition(|record| record.item_id == item_id);
        state.guest_actions = kept;
        if voided.is_empty() {
            return smallvec![Effect::None];
        }

        let mut kinds: Vec<ActionKind> = voided.iter().map(|record| record.kind).collect();
        kinds.sort_unstable();
        kinds.dedup();

        if state.notices.iter().all(|notice| notice.item_id != item_id) {
            tracing::info!(item_id = %item_id, voided = ?kinds, "Guest action voided by item removal");
            state.notices.push(Notice {
                item_id,
                item_name,
                voided: kinds,
                raised_at: env.clock.now(),
            });
        }

        let guests = Arc::clone(&env.guests);
        smallvec![async_effect! {
            for record in &voided {
                guests.remove_action(record);
            }
            None
        }]
    }

    /// Remember a successful guest write, or void it right away when the
    /// item disappeared while the write was in flight
    fn journal(state: &mut ListViewState, env: &ListViewEnvironment, record: GuestActionRecord) -> Effects {
        let item_id = record.item_id;
        if !state.guest_actions.contains(&record) {
            state.guest_actions.push(record);
        }
        if state.deleted_items.contains(&item_id) {
            return Self::void_actions(state, env, item_id, None);
        }
        smallvec![Effect::None]
    }

    // ═══════════════════════════════════════════════════════════
    // Loading
    // ═══════════════════════════════════════════════════════════

    fn load(state: &ListViewState, env: &ListViewEnvironment) -> Effects {
        let remote = Arc::clone(&env.remote);
        let guests = Arc::clone(&env.guests);
        let policy = env.config.load_retry_policy();
        let list_id = state.list_id;
        let current_user = state.current_user;

        smallvec![async_effect! {
            let result = retry_with_backoff(
                &policy,
                || load_snapshot(remote.as_ref(), guests.as_ref(), list_id, current_user),
                CoordinationError::is_retryable,
            )
            .await;
            Some(match result {
                Ok(snapshot) => ListViewAction::Loaded(Box::new(snapshot)),
                Err(error) => ListViewAction::LoadFailed { error },
            })
        }]
    }

    fn apply_snapshot(state: &mut ListViewState, env: &ListViewEnvironment, snapshot: Snapshot) -> Effects {
        let Snapshot {
            list,
            viewer,
            items,
            reservations,
            contributions,
            guest_actions,
        } = snapshot;

        state.list = Some(list);
        state.viewer = viewer;
        state.items = items.into_iter().map(|item| (item.id, item)).collect();
        state.reservations = reservations
            .into_iter()
            .filter(|r| state.items.contains_key(&r.item_id))
            .map(|r| (r.id, r))
            .collect();
        state.contributions = contributions
            .into_iter()
            .filter(|c| state.items.contains_key(&c.item_id))
            .map(|c| (c.id, c))
            .collect();
        state.guest_actions = guest_actions;
        state.phase = Phase::Ready;

        let mut effects = Effects::new();

        // Items removed while this guest was away.
        let mut orphaned: Vec<ItemId> = state
            .guest_actions
            .iter()
            .map(|record| record.item_id)
            .filter(|item_id| !state.items.contains_key(item_id))
            .collect();
        orphaned.sort_unstable();
        orphaned.dedup();
        for item_id in orphaned {
            effects.extend(Self::void_actions(state, env, item_id, None));
        }

        let list_id = state.list_id;
        let known: Vec<ItemId> = state.items.keys().copied().collect();
        effects.push(Self::follow(
            state,
            env,
            Feed::new(Table::Items, FeedScope::List),
            Filter::eq("list_id", list_id),
        ));
        effects.push(Self::follow(
            state,
            env,
            Feed::new(Table::Reservations, FeedScope::KnownItems),
            Filter::any_of("item_id", &known),
        ));
        effects.push(Self::follow(
            state,
            env,
            Feed::new(Table::Contributions, FeedScope::KnownItems),
            Filter::any_of("item_id", &known),
        ));

        tracing::info!(
            list_id = %state.list_id,
            items = state.items.len(),
            owner = state.viewer.is_owner(),
            "List view ready"
        );
        effects
    }

    // ═══════════════════════════════════════════════════════════
    // Folding
    // ═══════════════════════════════════════════════════════════

    fn fold(state: &mut ListViewState, env: &ListViewEnvironment, event: ChangeEvent) -> Effects {
        match event {
            ChangeEvent::ItemInserted(item) => {
                if item.list_id != state.list_id
                    || state.deleted_items.contains(&item.id)
                    || state.items.contains_key(&item.id)
                {
                    return smallvec![Effect::None];
                }
                let item_id = item.id;
                state.items.insert(item_id, item);
                Self::follow_item(state, env, item_id)
            },
            ChangeEvent::ItemUpdated(item) => {
                if let Some(known) = state.items.get_mut(&item.id) {
                    known.name = item.name;
                    known.url = item.url;
                    known.price = item.price;
                    known.image_url = item.image_url;
                }
                smallvec![Effect::None]
            },
            ChangeEvent::ItemDeleted { id } => {
                state.deleted_items.insert(id);
                Self::unfollow_item(state, id);
                let removed = state.items.remove(&id);
                state.reservations.retain(|_, r| r.item_id != id);
                state.contributions.retain(|_, c| c.item_id != id);
                Self::void_actions(state, env, id, removed.map(|item| item.name))
            },
            ChangeEvent::ReservationInserted(reservation) => {
                if state.items.contains_key(&reservation.item_id)
                    && !state.deleted_reservations.contains(&reservation.id)
                {
                    state.reservations.entry(reservation.id).or_insert(reservation);
                }
                smallvec![Effect::None]
            },
            ChangeEvent::ReservationDeleted { id } => {
                state.deleted_reservations.insert(id);
                state.reservations.remove(&id);
                smallvec![Effect::None]
            },
            ChangeEvent::ContributionInserted(contribution) => {
                if state.items.contains_key(&contribution.item_id)
                    && !state.deleted_contributions.contains(&contribution.id)
                {
                    state.contributions.entry(contribution.id).or_insert(contribution);
                }
                smallvec![Effect::None]
            },
            ChangeEvent::ContributionDeleted { id } => {
                state.deleted_contributions.insert(id);
                state.contributions.remove(&id);
                smallvec![Effect::None]
            },
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Guest commands
    // ═══════════════════════════════════════════════════════════

    fn set_guest_name(state: &mut ListViewState, env: &ListViewEnvironment, op: OperationId, input: &str) -> Effects {
        if state.viewer.is_owner() {
            return Self::skip(op, "set_guest_name");
        }
        let name = match GuestName::parse(input) {
            Ok(name) => name,
            Err(e) => return Self::reject(op, e.into()),
        };
        state.viewer = Viewer::Guest {
            name: Some(name.clone()),
        };

        let guests = Arc::clone(&env.guests);
        smallvec![async_effect! {
            guests.set_guest_name(&name);
            Some(ListViewAction::completed(op, Ok(Outcome::NameSaved)))
        }]
    }

    fn claim(state: &ListViewState, env: &ListViewEnvironment, op: OperationId, item_id: ItemId) -> Effects {
        if state.viewer.is_owner() {
            return Self::skip(op, "claim");
        }
        let name = match Self::guest_name(state) {
            Ok(name) => name,
            Err(e) => return Self::reject(op, e),
        };
        if !state.items.contains_key(&item_id) {
            return Self::reject(op, Self::not_found(item_id));
        }

        match check_claim(state.reservations_for(item_id), &name) {
            Err(conflict) => Self::reject(op, conflict.into()),
            Ok(ClaimDecision::AlreadyHeld) => Self::reply(op, Ok(Outcome::AlreadyHeld { item_id })),
            Ok(ClaimDecision::Reserve) => {
                let claims = env.claims();
                let list_id = state.list_id;
                smallvec![async_effect! {
                    let result = claims
                        .claim(list_id, item_id, &name)
                        .await
                        .map(|reservation| Outcome::Claimed { item_id, reservation });
                    Some(ListViewAction::completed(op, result))
                }]
            },
        }
    }

    fn release(state: &ListViewState, env: &ListViewEnvironment, op: OperationId, item_id: ItemId) -> Effects {
        if state.viewer.is_owner() {
            return Self::skip(op, "release");
        }
        let name = match Self::guest_name(state) {
            Ok(name) => name,
            Err(e) => return Self::reject(op, e),
        };

        let held: Vec<ReservationId> = held_by(state.reservations_for(item_id), &name).collect();
        let list_id = state.list_id;
        if held.is_empty() {
            let guests = Arc::clone(&env.guests);
            return smallvec![async_effect! {
                guests.remove_action(&GuestActionRecord::new(list_id, item_id, ActionKind::Claim));
                Some(ListViewAction::completed(op, Ok(Outcome::NothingToRelease { item_id })))
            }];
        }

        let claims = env.claims();
        smallvec![async_effect! {
            let reservations = held.clone();
            let result = claims.release(list_id, item_id, held).await.map(|deleted| {
                if deleted == 0 {
                    Outcome::NothingToRelease { item_id }
                } else {
                    Outcome::Released { item_id, reservations }
                }
            });
            Some(ListViewAction::completed(op, result))
        }]
    }

    fn contribute(
        state: &ListViewState,
        env: &ListViewEnvironment,
        op: OperationId,
        item_id: ItemId,
        input: &str,
    ) -> Effects {
        if state.viewer.is_owner() {
            return Self::skip(op, "contribute");
        }
        let name = match Self::guest_name(state) {
            Ok(name) => name,
            Err(e) => return Self::reject(op, e),
        };
        let Some(item) = state.items.get(&item_id) else {
            return Self::reject(op, Self::not_found(item_id));
        };
        let amount = match parse_amount(input) {
            Ok(amount) => amount,
            Err(e) => return Self::reject(op, e.into()),
        };
        if let Err(e) = check_contribution(
            item,
            state.reservations_for(item_id),
            state.contributions_for(item_id),
            amount,
            env.config.min_contribution,
        ) {
            return Self::reject(op, e);
        }

        let funding = env.funding();
        let list_id = state.list_id;
        smallvec![async_effect! {
            let result = funding
                .contribute(list_id, item_id, &name, amount)
                .await
                .map(|contribution| Outcome::Contributed { item_id, contribution });
            Some(ListViewAction::completed(op, result))
        }]
    }

    // ═══════════════════════════════════════════════════════════
    // Owner commands
    // ═══════════════════════════════════════════════════════════

    fn create_item(state: &ListViewState, env: &ListViewEnvironment, op: OperationId, draft: &ItemDraft) -> Effects {
        if !state.viewer.is_owner() {
            return Self::skip(op, "create_item");
        }
        let fields = match draft.validate() {
            Ok(fields) => fields,
            Err(e) => return Self::reject(op, e.into()),
        };

        let items = env.items();
        let list_id = state.list_id;
        smallvec![async_effect! {
            let result = items
                .create(list_id, &fields)
                .await
                .map(|item| Outcome::ItemCreated { item });
            Some(ListViewAction::completed(op, result))
        }]
    }

    fn update_item(
        state: &ListViewState,
        env: &ListViewEnvironment,
        op: OperationId,
        item_id: ItemId,
        draft: &ItemDraft,
    ) -> Effects {
        if !state.viewer.is_owner() {
            return Self::skip(op, "update_item");
        }
        if !state.items.contains_key(&item_id) {
            return Self::reject(op, Self::not_found(item_id));
        }
        let fields = match draft.validate() {
            Ok(fields) => fields,
            Err(e) => return Self::reject(op, e.into()),
        };

        let items = env.items();
        smallvec![async_effect! {
            let result = items
                .update(item_id, &fields)
                .await
                .map(|item| Outcome::ItemUpdated { item });
            Some(ListViewAction::completed(op, result))
        }]
    }

    fn delete_item(state: &ListViewState, env: &ListViewEnvironment, op: OperationId, item_id: ItemId) -> Effects {
        if !state.viewer.is_owner() {
            return Self::skip(op, "delete_item");
        }
        if !state.items.contains_key(&item_id) {
            return Self::reject(op, Self::not_found(item_id));
        }
        if state.has_activity(item_id) {
            tracing::info!(item_id = %item_id, "Deleting an item with reservations or contributions");
        }

        let items = env.items();
        smallvec![async_effect! {
            let result = items.delete(item_id).await.map(|()| Outcome::ItemDeleted { item_id });
            Some(ListViewAction::completed(op, result))
        }]
    }

    /// Record a finished write in the guest journal
    ///
    /// Rows only change when the write's change-feed echo is folded.
    fn succeeded(state: &mut ListViewState, env: &ListViewEnvironment, outcome: &Outcome) -> Effects {
        state.last_error = None;
        let list_id = state.list_id;
        match *outcome {
            Outcome::Claimed { item_id, .. } => Self::journal(
                state,
                env,
                GuestActionRecord::new(list_id, item_id, ActionKind::Claim),
            ),
            Outcome::Contributed { item_id, .. } => Self::journal(
                state,
                env,
                GuestActionRecord::new(list_id, item_id, ActionKind::Contribute),
            ),
            Outcome::Released { item_id, .. } | Outcome::NothingToRelease { item_id } => {
                Self::forget_claim(state, item_id);
                smallvec![Effect::None]
            },
            Outcome::AlreadyHeld { .. }
            | Outcome::ItemCreated { .. }
            | Outcome::ItemUpdated { .. }
            | Outcome::ItemDeleted { .. }
            | Outcome::NameSaved
            | Outcome::Skipped => smallvec![Effect::None],
        }
    }

    fn forget_claim(state: &mut ListViewState, item_id: ItemId) {
        state
            .guest_actions
            .retain(|r| !(r.item_id == item_id && r.kind == ActionKind::Claim));
    }
}

impl Reducer for ListViewReducer {
    type State = ListViewState;
    type Action = ListViewAction;
    type Environment = ListViewEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per action
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        if state.phase == Phase::Closed {
            tracing::trace!(?action, "List view closed, dropping action");
            return smallvec![Effect::None];
        }

        match action {
            // ========== Lifecycle ==========
            ListViewAction::Open => match state.phase {
                Phase::Loading | Phase::Errored { .. } if state.list.is_none() => {
                    state.phase = Phase::Loading;
                    Self::load(state, env)
                },
                _ => smallvec![Effect::None],
            },

            ListViewAction::Loaded(snapshot) => {
                if state.phase != Phase::Loading {
                    return smallvec![Effect::None];
                }
                Self::apply_snapshot(state, env, *snapshot)
            },

            ListViewAction::LoadFailed { error } => {
                tracing::error!(list_id = %state.list_id, error = %error, "List view failed to load");
                state.last_error = Some(error.clone());
                state.phase = Phase::Errored { error };
                smallvec![Effect::None]
            },

            ListViewAction::FeedOpened { feed } => {
                if Self::is_dropped(state, feed) {
                    return smallvec![Effect::None];
                }
                state.opening_feeds.remove(&feed);
                state.live_feeds.insert(feed);
                tracing::debug!(?feed, "Subscription live");
                Self::catch_up(state, env, feed)
            },

            ListViewAction::FeedLost { feed, reason } => {
                if Self::is_dropped(state, feed) {
                    return smallvec![Effect::None];
                }
                tracing::warn!(?feed, reason = %reason, "Subscription lost, view may go stale");
                state.feed_handles.remove(&feed);
                state.opening_feeds.remove(&feed);
                state.live_feeds.remove(&feed);
                state.stale_feeds.insert(feed);
                smallvec![Effect::None]
            },

            ListViewAction::Change(event) => {
                if state.phase != Phase::Ready {
                    return smallvec![Effect::None];
                }
                Self::fold(state, env, event)
            },

            ListViewAction::CaughtUp { feed, events } => {
                if state.phase != Phase::Ready || Self::is_dropped(state, feed) {
                    return smallvec![Effect::None];
                }
                let mut effects = Effects::new();
                for event in events {
                    effects.extend(Self::fold(state, env, event));
                }
                effects
            },

            ListViewAction::DismissNotices => {
                state.notices.clear();
                smallvec![Effect::None]
            },

            ListViewAction::Close => {
                tracing::debug!(list_id = %state.list_id, "List view closed");
                state.phase = Phase::Closed;
                for (_, handle) in state.feed_handles.drain() {
                    handle.abort();
                }
                state.opening_feeds.clear();
                state.live_feeds.clear();
                smallvec![Effect::None]
            },

            // ========== Commands ==========
            ListViewAction::SetGuestName { op, name } => match Self::ready(state) {
                Ok(()) => Self::set_guest_name(state, env, op, &name),
                Err(e) => Self::reject(op, e),
            },

            ListViewAction::Claim { op, item_id } => match Self::ready(state) {
                Ok(()) => Self::claim(state, env, op, item_id),
                Err(e) => Self::reject(op, e),
            },

            ListViewAction::Release { op, item_id } => match Self::ready(state) {
                Ok(()) => Self::release(state, env, op, item_id),
                Err(e) => Self::reject(op, e),
            },

            ListViewAction::Contribute { op, item_id, amount } => match Self::ready(state) {
                Ok(()) => Self::contribute(state, env, op, item_id, &amount),
                Err(e) => Self::reject(op, e),
            },

            ListViewAction::CreateItem { op, draft } => match Self::ready(state) {
                Ok(()) => Self::create_item(state, env, op, &draft),
                Err(e) => Self::reject(op, e),
            },

            ListViewAction::UpdateItem { op, item_id, draft } => match Self::ready(state) {
                Ok(()) => Self::update_item(state, env, op, item_id, &draft),
                Err(e) => Self::reject(op, e),
            },

            ListViewAction::DeleteItem { op, item_id } => match Self::ready(state) {
                Ok(()) => Self::delete_item(state, env, op, item_id),
                Err(e) => Self::reject(op, e),
            },

            // ========== Results ==========
            ListViewAction::OperationSucceeded { op, outcome } => {
                tracing::debug!(op = %op, ?outcome, "Command succeeded");
                Self::succeeded(state, env, &outcome)
            },

            ListViewAction::OperationFailed { op, error } => {
                tracing::debug!(op = %op, category = error.category(), "Command failed");
                state.last_error = Some(error);
                smallvec![Effect::None]
            },
        }
    }
}
