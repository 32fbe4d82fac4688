//! Wishlist demo
//!
//! Plays a birthday list through one owner view and two guest views sharing
//! an in-memory store: pooled funding of a bike, a contested kettle, and the
//! owner removing the kettle after it was claimed.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=wishlist_engine=debug cargo run --bin wishlist-demo
//! ```
//!
//! Ann's guest journal is written to `WISHLIST_GUEST_STORE` when set, and to
//! a scratch directory removed on exit otherwise.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wishlist_engine::{
    EngineConfig, FileGuestStore, GuestIdentityStore, InMemoryCollection, ItemDraft, ItemId,
    ItemView, ListDirectory, ListViewEnvironment, ListViewSession, MemoryGuestStore, Outcome,
    RemoteCollection, UserId,
};

fn print_views(label: &str, views: &[ItemView]) {
    println!("  {label}:");
    for view in views {
        let price = view
            .price
            .map_or_else(|| "no price".to_string(), |p| p.to_string());
        let holder = view
            .holder
            .as_deref()
            .map_or_else(String::new, |h| format!(" by {h}"));
        println!(
            "    {:<8} {:>10}  {:<16} {:>3.0}%{}",
            view.name,
            price,
            view.status.label(),
            view.progress * 100.0,
            holder
        );
    }
}

fn created(outcome: &Outcome) -> anyhow::Result<ItemId> {
    outcome
        .item_id()
        .ok_or_else(|| anyhow::anyhow!("item was not created: {outcome:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,wishlist_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    let remote: Arc<dyn RemoteCollection> = Arc::new(InMemoryCollection::default());

    println!("\n=== Wishlist demo ===\n");

    // ========== Owner sets up the list ==========
    let owner_id = UserId::new();
    let list = ListDirectory::new(Arc::clone(&remote))
        .create_list(owner_id, "Lena's birthday", None)
        .await?;
    println!("1. Created list \"{}\"", list.title);

    let owner_env = ListViewEnvironment::new(Arc::clone(&remote), Arc::new(MemoryGuestStore::default()))
        .with_config(config.clone());
    let owner = ListViewSession::open(owner_env, list.id, Some(owner_id)).await?;

    let bike = created(&owner.create_item(ItemDraft::named("Bike").with_price("10000")).await?)?;
    let kettle = created(&owner.create_item(ItemDraft::named("Kettle").with_price("45")).await?)?;
    let book = created(&owner.create_item(ItemDraft::named("Book")).await?)?;
    owner
        .until(|s| [bike, kettle, book].iter().all(|id| s.items.contains_key(id)))
        .await?;
    print_views("owner", &owner.views().await);

    // ========== Guests arrive ==========
    let scratch = tempfile::tempdir()?;
    let journal = config
        .guest_store_path
        .clone()
        .unwrap_or_else(|| scratch.path().join("ann.json"));
    let ann_store: Arc<dyn GuestIdentityStore> = Arc::new(FileGuestStore::new(journal));
    let ann_env = ListViewEnvironment::new(Arc::clone(&remote), Arc::clone(&ann_store))
        .with_config(config.clone());
    let ann = ListViewSession::open(ann_env, list.id, None).await?;
    ann.set_guest_name("Ann").await?;

    let bo_env = ListViewEnvironment::new(Arc::clone(&remote), Arc::new(MemoryGuestStore::default()))
        .with_config(config.clone());
    let bo = ListViewSession::open(bo_env, list.id, None).await?;
    bo.set_guest_name("Bo").await?;
    println!("\n2. Ann and Bo opened the list");

    // ========== Pooled funding ==========
    ann.contribute(bike, "7000").await?;
    bo.until(|s| s.contributions_for(bike).count() == 1).await?;
    match bo.contribute(bike, "4000").await {
        Ok(outcome) => println!("   unexpected: {outcome:?}"),
        Err(e) => println!("\n3. Bo offers 4000 for the bike: {}", e.user_message()),
    }
    bo.contribute(bike, "3000").await?;
    println!("   Bo offers 3000 instead");

    // ========== Contested claim ==========
    ann.claim(kettle).await?;
    bo.until(|s| s.reservations_for(kettle).count() == 1).await?;
    match bo.claim(kettle).await {
        Ok(outcome) => println!("   unexpected: {outcome:?}"),
        Err(e) => println!("\n4. Bo tries the kettle: {}", e.user_message()),
    }
    bo.until(|s| s.contributions_for(bike).count() == 2).await?;
    print_views("Bo", &bo.views().await);

    // ========== Owner removes a claimed item ==========
    if owner.has_activity(kettle).await {
        println!("\n5. Owner removes the kettle although Ann claimed it");
    }
    owner.delete_item(kettle).await?;
    ann.until(|s| !s.notices.is_empty()).await?;
    for notice in ann.notices().await {
        println!("   notice for Ann: {}", notice.message());
    }
    ann.dismiss_notices().await?;
    print_views("Ann", &ann.views().await);

    for view in [&owner, &ann, &bo] {
        view.close().await;
    }
    println!("\nDone.");
    Ok(())
}
