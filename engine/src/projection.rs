//! View projection: per-item display status.
//!
//! Pure functions from items, reservations, contributions and the viewer to
//! what the page shows. No side effects, no clock.

use crate::claims::holder;
use crate::funding::FundingSummary;
use crate::types::{Contribution, Item, ItemId, Money, Reservation, Viewer};
use serde::Serialize;

/// Display status of an item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    /// Nobody claimed or funded it yet
    Free,
    /// The viewer holds the reservation
    ReservedByMe,
    /// Someone else holds the reservation
    ReservedByOther,
    /// Contributions started but do not cover the price
    Collecting,
    /// Contributions cover the price
    Funded,
}

impl ItemStatus {
    /// Short label for the status
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::ReservedByMe => "reserved by you",
            Self::ReservedByOther => "reserved",
            Self::Collecting => "collecting",
            Self::Funded => "funded",
        }
    }
}

/// Everything the page needs to render one item
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemView {
    /// Item id
    pub item_id: ItemId,
    /// Item name
    pub name: String,
    /// Price as entered
    pub price: Option<Money>,
    /// Display status
    pub status: ItemStatus,
    /// Name of the displayed reservation holder
    pub holder: Option<String>,
    /// Whether a claim button is shown
    pub can_claim: bool,
    /// Whether a release button is shown
    pub can_release: bool,
    /// Whether a contribute button is shown
    pub can_contribute: bool,
    /// Funding progress in `[0, 1]`
    pub progress: f64,
    /// True sum of contributions, may exceed the price after a race
    pub collected: Money,
    /// Still missing, for priced items
    pub remaining: Option<Money>,
}

/// Project one item
///
/// `reservations` and `contributions` must belong to `item`.
#[must_use]
pub fn project_item<'a, R, C>(item: &Item, reservations: R, contributions: C, viewer: &Viewer) -> ItemView
where
    R: IntoIterator<Item = &'a Reservation>,
    C: IntoIterator<Item = &'a Contribution>,
{
    let funding = FundingSummary::of(item, contributions);
    let holder = holder(reservations);
    let is_guest = !viewer.is_owner();

    let (status, can_claim, can_release, can_contribute) = match holder {
        Some(reservation) => {
            let mine = viewer
                .guest_name()
                .is_some_and(|name| name.as_str() == reservation.reserver_name);
            if mine {
                (ItemStatus::ReservedByMe, false, true, false)
            } else {
                (ItemStatus::ReservedByOther, false, false, false)
            }
        },
        None if funding.is_funded() => (ItemStatus::Funded, false, false, false),
        None if funding.is_fundable() && funding.collected.is_positive() => {
            (ItemStatus::Collecting, false, false, true)
        },
        None => (ItemStatus::Free, true, false, funding.is_fundable()),
    };

    ItemView {
        item_id: item.id,
        name: item.name.clone(),
        price: item.price,
        status,
        holder: holder.map(|r| r.reserver_name.clone()),
        can_claim: is_guest && can_claim,
        can_release: is_guest && can_release,
        can_contribute: is_guest && can_contribute,
        progress: funding.progress(),
        collected: funding.collected,
        remaining: funding.remaining(),
    }
}
