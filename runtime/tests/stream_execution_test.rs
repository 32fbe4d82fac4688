//! Integration tests for `Effect::Stream` execution and store teardown
//!
//! Subscriptions are stream effects, so these tests pin down the behavior
//! the wishlist engine relies on: ordered feedback, observer broadcast,
//! source release on close, and discarded late results.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wishlist_core::{SmallVec, async_effect, effect::Effect, reducer::Reducer, smallvec};
use wishlist_runtime::{Store, StoreConfig};

#[derive(Clone, Debug, Default, PartialEq)]
struct FeedState {
    received: Vec<String>,
    late_results: usize,
}

#[derive(Clone, Debug, PartialEq)]
enum FeedAction {
    Follow { items: Vec<String> },
    FollowForever { released: Arc<ReleaseFlag> },
    Received { text: String },
    SlowWrite,
    SlowWriteDone,
}

/// Sets its flag when dropped, standing in for a live subscription handle.
#[derive(Debug, Default)]
struct ReleaseFlag(AtomicBool);

impl PartialEq for ReleaseFlag {
    fn eq(&self, other: &Self) -> bool {
        self.0.load(Ordering::SeqCst) == other.0.load(Ordering::SeqCst)
    }
}

struct Subscription(Arc<ReleaseFlag>);

impl Drop for Subscription {
    fn drop(&mut self) {
        self.0.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct FeedReducer;

impl Reducer for FeedReducer {
    type State = FeedState;
    type Action = FeedAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut FeedState,
        action: FeedAction,
        _env: &(),
    ) -> SmallVec<[Effect<FeedAction>; 4]> {
        match action {
            FeedAction::Follow { items } => smallvec![Effect::Stream(Box::pin(
                futures::stream::iter(items.into_iter().map(|text| FeedAction::Received { text }))
            ))],
            FeedAction::FollowForever { released } => {
                let stream = async_stream::stream! {
                    let _subscription = Subscription(released);
                    let mut n = 0_u64;
                    loop {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        n += 1;
                        yield FeedAction::Received { text: format!("tick-{n}") };
                    }
                };
                smallvec![Effect::Stream(Box::pin(stream))]
            },
            FeedAction::Received { text } => {
                state.received.push(text);
                SmallVec::new()
            },
            FeedAction::SlowWrite => smallvec![async_effect! {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(FeedAction::SlowWriteDone)
            }],
            FeedAction::SlowWriteDone => {
                state.late_results += 1;
                SmallVec::new()
            },
        }
    }
}

#[tokio::test]
async fn stream_items_are_folded_in_order() {
    let store = Store::new(FeedState::default(), FeedReducer, ());

    store
        .send(FeedAction::Follow {
            items: vec!["a".into(), "b".into(), "c".into()],
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let received = store.state(|s| s.received.clone()).await;
    assert_eq!(received, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn stream_items_reach_action_observers() {
    let store = Store::new(FeedState::default(), FeedReducer, ());
    let mut observer = store.subscribe_actions();

    store
        .send(FeedAction::Follow {
            items: vec!["only".into()],
        })
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(1), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, FeedAction::Received { text: "only".into() });
}

#[tokio::test]
async fn close_releases_stream_source() {
    let store = Store::new(FeedState::default(), FeedReducer, ());
    let released = Arc::new(ReleaseFlag::default());

    store
        .send(FeedAction::FollowForever {
            released: Arc::clone(&released),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!released.0.load(Ordering::SeqCst));

    store.close().await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(released.0.load(Ordering::SeqCst));
}

#[tokio::test]
async fn late_future_results_are_discarded_after_close() {
    let config = StoreConfig::default().with_shutdown_timeout(Duration::from_millis(1));
    let store = Store::with_config(FeedState::default(), FeedReducer, (), config);

    store.send(FeedAction::SlowWrite).await.unwrap();
    store.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.state(|s| s.late_results).await, 0);
}
