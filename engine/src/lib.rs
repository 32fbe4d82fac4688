//! # Wishlist Engine
//!
//! Coordination engine for shared wishlists. A list owner publishes items;
//! guests, identified only by a self-chosen name, reserve items outright or
//! pool money toward priced ones. Every open view of a list follows the
//! remote store's change feed and reconciles it into local state.
//!
//! ## Layout
//!
//! - [`types`], [`error`], [`config`]: domain records, errors, settings
//! - [`remote`], [`memory`]: the remote store boundary and an in-memory store
//! - [`guest`]: client-local guest name and action journal
//! - [`lists`], [`items`], [`metadata`]: owner-side list and item management
//! - [`claims`], [`funding`]: the two guest write paths and their rules
//! - [`projection`]: per-item display status
//! - [`state`], [`reconciler`], [`session`]: one live list view
//!
//! ## Example
//!
//! ```rust,ignore
//! use wishlist_engine::{ListViewEnvironment, ListViewSession};
//!
//! let env = ListViewEnvironment::new(remote, guests);
//! let view = ListViewSession::open(env, list_id, None).await?;
//! view.set_guest_name("Ann").await?;
//! view.claim(item_id).await?;
//! for item in view.views().await {
//!     println!("{} [{}]", item.name, item.status.label());
//! }
//! view.close().await;
//! ```

pub mod claims;
pub mod config;
pub mod error;
pub mod funding;
pub mod guest;
pub mod items;
pub mod lists;
pub mod memory;
pub mod metadata;
pub mod projection;
pub mod reconciler;
pub mod remote;
pub mod session;
pub mod state;
pub mod types;

pub use config::EngineConfig;
pub use error::{ConflictError, CoordinationError, Result, ValidationError};
pub use guest::{FileGuestStore, GuestIdentityStore, MemoryGuestStore};
pub use items::{ItemDraft, ItemRepository};
pub use lists::ListDirectory;
pub use memory::InMemoryCollection;
pub use projection::{ItemStatus, ItemView, project_item};
pub use reconciler::{ListViewAction, ListViewEnvironment, ListViewReducer, Outcome};
pub use remote::{ChangeEvent, RemoteCollection, Table};
pub use session::ListViewSession;
pub use state::{ListViewState, Notice, Phase};
pub use types::{
    ActionKind, GuestActionRecord, GuestName, Item, ItemId, List, ListId, Money, UserId, Viewer,
};
