//! End-to-end scenarios for live list views
//!
//! Every test shares one in-memory store between an owner view and one or
//! more guest views, so writes made through one view reach the others only
//! through the change feed.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;
use wishlist_engine::memory::Operation;
use wishlist_engine::{
    ActionKind, ConflictError, CoordinationError, EngineConfig, GuestIdentityStore, GuestName,
    InMemoryCollection, ItemDraft, ItemId, ItemRepository, ItemStatus, List, ListDirectory,
    ListId, ListViewEnvironment, ListViewSession, MemoryGuestStore, Money, Outcome, Phase,
    RemoteCollection, Table, UserId, ValidationError,
};
use wishlist_testing::SteppingClock;

struct World {
    remote: Arc<InMemoryCollection>,
    list: List,
    owner_id: UserId,
}

impl World {
    async fn new() -> Self {
        Self::with_store(InMemoryCollection::new(Arc::new(SteppingClock::default()))).await
    }

    async fn with_store(store: InMemoryCollection) -> Self {
        let remote = Arc::new(store);
        let owner_id = UserId::new();
        let list = ListDirectory::new(Arc::clone(&remote) as Arc<dyn RemoteCollection>)
            .create_list(owner_id, "Birthday", None)
            .await
            .unwrap();
        Self {
            remote,
            list,
            owner_id,
        }
    }

    fn dyn_remote(&self) -> Arc<dyn RemoteCollection> {
        Arc::clone(&self.remote) as Arc<dyn RemoteCollection>
    }

    fn env(&self, guests: Arc<dyn GuestIdentityStore>) -> ListViewEnvironment {
        let config = EngineConfig::default()
            .with_load_retries(2, Duration::from_millis(5))
            .with_request_timeout(Duration::from_secs(2));
        ListViewEnvironment::new(self.dyn_remote(), guests).with_config(config)
    }

    async fn owner(&self) -> ListViewSession {
        let env = self.env(Arc::new(MemoryGuestStore::default()));
        ListViewSession::open(env, self.list.id, Some(self.owner_id))
            .await
            .unwrap()
    }

    async fn guest(&self, name: &str) -> (ListViewSession, Arc<MemoryGuestStore>) {
        let store = Arc::new(MemoryGuestStore::with_name(GuestName::parse(name).unwrap()));
        let session = self.guest_with(Arc::clone(&store)).await;
        (session, store)
    }

    async fn guest_with(&self, store: Arc<MemoryGuestStore>) -> ListViewSession {
        ListViewSession::open(self.env(store), self.list.id, None)
            .await
            .unwrap()
    }

    async fn add_item(&self, owner: &ListViewSession, draft: ItemDraft) -> ItemId {
        let outcome = owner.create_item(draft).await.unwrap();
        let Outcome::ItemCreated { item } = outcome else {
            panic!("expected a created item, got {outcome:?}");
        };
        assert!(owner.state(|s| s.items.contains_key(&item.id)).await);
        item.id
    }
}

async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn pooled_funding_fills_the_price_and_no_more() {
    let world = World::new().await;
    let owner = world.owner().await;
    let bike = world
        .add_item(&owner, ItemDraft::named("Bike").with_price("10000"))
        .await;
    let (ann, _) = world.guest("Ann").await;
    let (bo, _) = world.guest("Bo").await;

    ann.contribute(bike, "7000").await.unwrap();
    bo.until(|s| s.contributions_for(bike).count() == 1).await.unwrap();
    assert_eq!(bo.view_of(bike).await.unwrap().status, ItemStatus::Collecting);

    let overshoot = bo.contribute(bike, "4000").await;
    assert_eq!(
        overshoot,
        Err(CoordinationError::Validation(ValidationError::ExceedsRemaining {
            remaining: Money::from_units(3_000)
        }))
    );

    bo.contribute(bike, "3000").await.unwrap();
    for view in [&owner, &ann, &bo] {
        view.until(|s| s.contributions_for(bike).count() == 2).await.unwrap();
        let item = view.view_of(bike).await.unwrap();
        assert_eq!(item.status, ItemStatus::Funded);
        assert!((item.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(item.collected, Money::from_units(10_000));
    }

    let late = ann.contribute(bike, "100").await;
    assert_eq!(late, Err(CoordinationError::Conflict(ConflictError::AlreadyFunded)));
}

#[tokio::test]
async fn claim_is_exclusive_and_release_is_idempotent() {
    let world = World::new().await;
    let owner = world.owner().await;
    let kettle = world.add_item(&owner, ItemDraft::named("Kettle")).await;
    let (ann, ann_journal) = world.guest("Ann").await;
    let (bo, _) = world.guest("Bo").await;

    assert!(matches!(ann.claim(kettle).await, Ok(Outcome::Claimed { .. })));
    assert_eq!(ann.claim(kettle).await, Ok(Outcome::AlreadyHeld { item_id: kettle }));
    assert_eq!(ann.view_of(kettle).await.unwrap().status, ItemStatus::ReservedByMe);

    bo.until(|s| s.reservations_for(kettle).count() == 1).await.unwrap();
    let bo_view = bo.view_of(kettle).await.unwrap();
    assert_eq!(bo_view.status, ItemStatus::ReservedByOther);
    assert!(!bo_view.can_claim);
    assert_eq!(
        bo.claim(kettle).await,
        Err(CoordinationError::Conflict(ConflictError::AlreadyClaimed {
            holder: "Ann".into()
        }))
    );

    assert!(matches!(
        ann.release(kettle).await,
        Ok(Outcome::Released { item_id, .. }) if item_id == kettle
    ));
    assert_eq!(ann.state(|s| s.reservations_for(kettle).count()).await, 0);
    assert_eq!(
        ann.release(kettle).await,
        Ok(Outcome::NothingToRelease { item_id: kettle })
    );
    assert!(ann_journal.list_actions(world.list.id).is_empty());

    bo.until(|s| s.reservations_for(kettle).count() == 0).await.unwrap();
    assert!(matches!(bo.claim(kettle).await, Ok(Outcome::Claimed { .. })));
    assert_eq!(world.remote.row_count(Table::Reservations), 1);
}

#[tokio::test]
async fn racing_claims_leave_one_holder() {
    let world = World::new().await;
    let owner = world.owner().await;
    let lamp = world.add_item(&owner, ItemDraft::named("Lamp")).await;
    let (ann, _) = world.guest("Ann").await;
    let (bo, _) = world.guest("Bo").await;

    // Neither view has seen the other's reservation yet.
    let (first, second) = tokio::join!(ann.claim(lamp), bo.claim(lamp));
    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "ann: {first:?}, bo: {second:?}");

    for view in [&owner, &ann, &bo] {
        view.until(|s| s.reservations_for(lamp).count() == 1).await.unwrap();
    }
    let holder = owner.view_of(lamp).await.unwrap().holder;
    assert_eq!(ann.view_of(lamp).await.unwrap().holder, holder);
    assert_eq!(bo.view_of(lamp).await.unwrap().holder, holder);
    assert_eq!(world.remote.row_count(Table::Reservations), 1);
}

#[tokio::test]
async fn deleting_a_claimed_item_notifies_the_claimer_once() {
    let world = World::new().await;
    let owner = world.owner().await;
    let kettle = world.add_item(&owner, ItemDraft::named("Kettle")).await;
    let (ann, ann_journal) = world.guest("Ann").await;
    let (bo, _) = world.guest("Bo").await;

    ann.claim(kettle).await.unwrap();
    owner.until(|s| s.reservations_for(kettle).count() == 1).await.unwrap();
    assert!(owner.has_activity(kettle).await);

    assert_eq!(
        owner.delete_item(kettle).await,
        Ok(Outcome::ItemDeleted { item_id: kettle })
    );

    ann.until(|s| !s.items.contains_key(&kettle) && !s.notices.is_empty())
        .await
        .unwrap();
    let notices = ann.notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].voided, vec![ActionKind::Claim]);
    assert_eq!(notices[0].item_name.as_deref(), Some("Kettle"));
    eventually(|| ann_journal.list_actions(world.list.id).is_empty()).await;

    bo.until(|s| !s.items.contains_key(&kettle)).await.unwrap();
    assert!(bo.notices().await.is_empty());
    assert_eq!(world.remote.row_count(Table::Reservations), 0);

    ann.dismiss_notices().await.unwrap();
    assert!(ann.notices().await.is_empty());
}

#[tokio::test]
async fn contribution_below_minimum_leaves_no_trace() {
    let world = World::new().await;
    let owner = world.owner().await;
    let bike = world
        .add_item(&owner, ItemDraft::named("Bike").with_price("10000"))
        .await;
    let (ann, ann_journal) = world.guest("Ann").await;

    assert_eq!(
        ann.contribute(bike, "50").await,
        Err(CoordinationError::Validation(ValidationError::BelowMinimum {
            minimum: Money::from_units(100)
        }))
    );
    assert!(ann.last_error().await.is_some());
    assert_eq!(world.remote.row_count(Table::Contributions), 0);
    assert!(ann_journal.list_actions(world.list.id).is_empty());

    ann.contribute(bike, "100").await.unwrap();
    assert!(ann.last_error().await.is_none());
    assert_eq!(
        ann_journal.list_actions(world.list.id),
        vec![wishlist_engine::GuestActionRecord::new(
            world.list.id,
            bike,
            ActionKind::Contribute
        )]
    );
}

#[tokio::test]
async fn deletion_while_away_is_reconciled_on_next_open() {
    let world = World::new().await;
    let owner = world.owner().await;
    let bike = world
        .add_item(&owner, ItemDraft::named("Bike").with_price("500"))
        .await;
    let journal = Arc::new(MemoryGuestStore::with_name(GuestName::parse("Ann").unwrap()));

    let ann = world.guest_with(Arc::clone(&journal)).await;
    ann.contribute(bike, "200").await.unwrap();
    ann.close().await;

    owner.delete_item(bike).await.unwrap();

    let ann = world.guest_with(Arc::clone(&journal)).await;
    let notices = ann.notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].item_id, bike);
    assert_eq!(notices[0].voided, vec![ActionKind::Contribute]);
    assert!(notices[0].message().contains("virtually returned"));
    eventually(|| journal.list_actions(world.list.id).is_empty()).await;

    // Nothing left to reconcile on the following visit.
    ann.close().await;
    let ann = world.guest_with(journal).await;
    assert!(ann.notices().await.is_empty());
}

#[tokio::test]
async fn load_is_retried_before_the_view_errors() {
    let world = World::new().await;

    world
        .remote
        .inject_failure(Operation::Query, Table::Items, 1);
    let (recovered, _) = world.guest("Ann").await;
    assert_eq!(recovered.phase().await, Phase::Ready);

    world
        .remote
        .inject_failure(Operation::Query, Table::Lists, 10);
    let env = world.env(Arc::new(MemoryGuestStore::default()));
    let failed = ListViewSession::open(env, world.list.id, None).await;
    assert!(matches!(failed, Err(CoordinationError::Remote(_))));
}

#[tokio::test]
async fn unknown_list_is_not_found() {
    let world = World::new().await;
    let env = world.env(Arc::new(MemoryGuestStore::default()));
    let result = ListViewSession::open(env, ListId::new(), None).await;
    assert!(matches!(
        result,
        Err(CoordinationError::NotFound {
            table: Table::Lists,
            ..
        })
    ));
}

#[tokio::test]
async fn items_added_later_are_followed() {
    let world = World::new().await;
    let owner = world.owner().await;
    let (ann, _) = world.guest("Ann").await;
    let (bo, _) = world.guest("Bo").await;

    let scarf = world.add_item(&owner, ItemDraft::named("Scarf")).await;
    ann.until(|s| s.items.contains_key(&scarf) && s.live_feeds.len() == 5)
        .await
        .unwrap();
    bo.until(|s| s.items.contains_key(&scarf)).await.unwrap();

    bo.claim(scarf).await.unwrap();
    ann.until(|s| s.reservations_for(scarf).count() == 1).await.unwrap();
    assert_eq!(
        ann.view_of(scarf).await.unwrap().holder.as_deref(),
        Some("Bo")
    );

    owner
        .update_item(scarf, ItemDraft::named("Wool scarf").with_price("30"))
        .await
        .unwrap();
    ann.until(|s| s.items.get(&scarf).is_some_and(|i| i.name == "Wool scarf"))
        .await
        .unwrap();
    assert_eq!(
        ann.view_of(scarf).await.unwrap().price,
        Some(Money::from_units(30))
    );
}

#[tokio::test]
async fn removed_items_take_their_subscriptions_with_them() {
    let world = World::new().await;
    let owner = world.owner().await;
    let (ann, _) = world.guest("Ann").await;

    for round in 0..5 {
        let name = format!("Gift {round}");
        let gift = world.add_item(&owner, ItemDraft::named(&name)).await;
        ann.until(|s| s.items.contains_key(&gift)).await.unwrap();
        owner.delete_item(gift).await.unwrap();
        ann.until(|s| !s.items.contains_key(&gift)).await.unwrap();
    }

    ann.until(|s| s.items.is_empty()).await.unwrap();
    let (live, opening) = ann
        .state(|s| (s.live_feeds.len(), s.opening_feeds.len()))
        .await;
    assert_eq!(live, 3);
    assert_eq!(opening, 0);
}

#[tokio::test]
async fn lost_feeds_are_not_reopened() {
    let world = World::new().await;
    let owner = world.owner().await;
    world.add_item(&owner, ItemDraft::named("Kettle")).await;
    let (ann, _) = world.guest("Ann").await;

    world.remote.interrupt_feeds();
    ann.until(|s| s.live_feeds.is_empty() && s.stale_feeds.len() == 3)
        .await
        .unwrap();

    let items = ItemRepository::new(world.dyn_remote());
    items
        .create(world.list.id, &ItemDraft::named("Lamp").validate().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ann.state(|s| s.items.len()).await, 1);
    assert_eq!(ann.phase().await, Phase::Ready);
}

#[tokio::test]
async fn closed_view_stops_following() {
    let world = World::new().await;
    let owner = world.owner().await;
    let (ann, _) = world.guest("Ann").await;

    ann.close().await;
    ann.close().await;
    assert_eq!(ann.phase().await, Phase::Closed);

    let lamp = world.add_item(&owner, ItemDraft::named("Lamp")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ann.state(|s| s.items.is_empty()).await);
    assert_eq!(ann.claim(lamp).await, Err(CoordinationError::Closed));
}

#[tokio::test]
async fn commands_outside_the_viewer_role_are_skipped() {
    let world = World::new().await;
    let owner = world.owner().await;
    let kettle = world.add_item(&owner, ItemDraft::named("Kettle")).await;
    let (ann, _) = world.guest("Ann").await;

    assert_eq!(owner.claim(kettle).await, Ok(Outcome::Skipped));
    assert_eq!(owner.contribute(kettle, "10").await, Ok(Outcome::Skipped));
    assert_eq!(ann.create_item(ItemDraft::named("Pony")).await, Ok(Outcome::Skipped));
    assert_eq!(ann.delete_item(kettle).await, Ok(Outcome::Skipped));
    assert_eq!(world.remote.row_count(Table::Items), 1);
    assert_eq!(world.remote.row_count(Table::Reservations), 0);

    assert_eq!(
        owner.create_item(ItemDraft::named("   ")).await,
        Err(CoordinationError::Validation(ValidationError::MissingItemName))
    );
}

#[tokio::test]
async fn guest_picks_a_name_before_acting() {
    let world = World::new().await;
    let owner = world.owner().await;
    let kettle = world.add_item(&owner, ItemDraft::named("Kettle")).await;
    let journal = Arc::new(MemoryGuestStore::default());
    let guest = world.guest_with(Arc::clone(&journal)).await;

    assert_eq!(
        guest.claim(kettle).await,
        Err(CoordinationError::Validation(ValidationError::MissingGuestName))
    );
    assert_eq!(
        guest.set_guest_name("  ").await,
        Err(CoordinationError::Validation(ValidationError::MissingGuestName))
    );

    assert_eq!(guest.set_guest_name(" Cy ").await, Ok(Outcome::NameSaved));
    assert_eq!(journal.guest_name().map(String::from).as_deref(), Some("Cy"));
    assert!(matches!(guest.claim(kettle).await, Ok(Outcome::Claimed { .. })));
    assert_eq!(
        guest.view_of(kettle).await.unwrap().status,
        ItemStatus::ReservedByMe
    );
}

#[tokio::test]
async fn unique_index_reports_the_holder() {
    let world = World::with_store(
        InMemoryCollection::new(Arc::new(SteppingClock::default())).with_unique_reservations(),
    )
    .await;
    let owner = world.owner().await;
    let kettle = world.add_item(&owner, ItemDraft::named("Kettle")).await;
    let (ann, _) = world.guest("Ann").await;
    let (bo, _) = world.guest("Bo").await;

    let (first, second) = tokio::join!(ann.claim(kettle), bo.claim(kettle));
    let conflict = if first.is_ok() { second } else { first };
    assert!(matches!(
        conflict,
        Err(CoordinationError::Conflict(ConflictError::AlreadyClaimed { .. }))
    ));
    assert_eq!(world.remote.row_count(Table::Reservations), 1);
}
