//! Funding coordinator.
//!
//! Guests pool money toward priced items. The sum of contributions must
//! never exceed the price; this is checked against the locally known sum at
//! submission time. Two submissions racing past the check can overshoot,
//! which the projection tolerates by clamping progress.

use crate::claims::holder;
use crate::error::{ConflictError, CoordinationError, Result, ValidationError};
use crate::guest::GuestIdentityStore;
use crate::remote::{RemoteCollection, Table, decode_row};
use crate::types::{
    ActionKind, Contribution, GuestActionRecord, GuestName, Item, ItemId, ListId,
    Money, Reservation,
};
use serde_json::json;
use std::sync::Arc;

/// Funding state of one item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundingSummary {
    /// Positive price, absent if the item cannot be funded
    pub price: Option<Money>,
    /// True sum of all contributions (may exceed the price after a race)
    pub collected: Money,
}

impl FundingSummary {
    /// Summarize the contributions of `item`
    #[must_use]
    pub fn of<'a, I>(item: &Item, contributions: I) -> Self
    where
        I: IntoIterator<Item = &'a Contribution>,
    {
        Self {
            price: item.valid_price(),
            collected: contributions.into_iter().map(|c| c.amount).sum(),
        }
    }

    /// Whether the item has a positive price
    #[must_use]
    pub const fn is_fundable(&self) -> bool {
        self.price.is_some()
    }

    /// Whether contributions cover the price
    #[must_use]
    pub fn is_funded(&self) -> bool {
        self.price.is_some_and(|price| self.collected >= price)
    }

    /// Amount still missing, zero once funded
    #[must_use]
    pub fn remaining(&self) -> Option<Money> {
        self.price.map(|price| price.saturating_sub(self.collected))
    }

    /// `min(1, collected / price)`, zero for unfundable items
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        match self.price {
            Some(price) => {
                (self.collected.minor_units() as f64 / price.minor_units() as f64).clamp(0.0, 1.0)
            },
            None => 0.0,
        }
    }
}

/// Check a contribution against the known state of one item
///
/// Rules, in order: the item must have a positive price, must not be
/// reserved, must not be fully funded yet; the amount must reach the
/// minimum and fit into what is still missing.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn check_contribution<'a, R, C>(
    item: &Item,
    reservations: R,
    contributions: C,
    amount: Money,
    minimum: Money,
) -> Result<()>
where
    R: IntoIterator<Item = &'a Reservation>,
    C: IntoIterator<Item = &'a Contribution>,
{
    let summary = FundingSummary::of(item, contributions);
    let Some(remaining) = summary.remaining() else {
        return Err(ConflictError::NotFundable.into());
    };
    if let Some(reservation) = holder(reservations) {
        return Err(ConflictError::AlreadyClaimed {
            holder: reservation.reserver_name.clone(),
        }
        .into());
    }
    if summary.is_funded() {
        return Err(ConflictError::AlreadyFunded.into());
    }
    if amount < minimum {
        return Err(ValidationError::BelowMinimum { minimum }.into());
    }
    if amount > remaining {
        return Err(ValidationError::ExceedsRemaining { remaining }.into());
    }
    Ok(())
}

/// Parse a contribution amount typed by a guest
///
/// # Errors
///
/// Returns [`ValidationError::InvalidAmount`] unless the input is a positive
/// decimal.
pub fn parse_amount(input: &str) -> std::result::Result<Money, ValidationError> {
    Money::parse(input)
        .ok()
        .filter(|amount| amount.is_positive())
        .ok_or(ValidationError::InvalidAmount)
}

/// Performs contribution writes
#[derive(Clone)]
pub struct FundingCoordinator {
    remote: Arc<dyn RemoteCollection>,
    guests: Arc<dyn GuestIdentityStore>,
}

impl FundingCoordinator {
    /// Coordinator over a store and a guest journal
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteCollection>, guests: Arc<dyn GuestIdentityStore>) -> Self {
        Self { remote, guests }
    }

    /// Write a contribution and journal it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the item was deleted meanwhile, or other remote
    /// failures.
    #[tracing::instrument(skip(self, guest), fields(guest = %guest, amount = %amount))]
    pub async fn contribute(
        &self,
        list_id: ListId,
        item_id: ItemId,
        guest: &GuestName,
        amount: Money,
    ) -> Result<Contribution> {
        let row = self
            .remote
            .insert(
                Table::Contributions,
                json!({
                    "item_id": item_id,
                    "contributor_name": guest.as_str(),
                    "amount": amount,
                }),
            )
            .await
            .map_err(CoordinationError::from)?;
        let contribution: Contribution = decode_row(Table::Contributions, row)?;

        self.guests.log_action(GuestActionRecord::new(
            list_id,
            item_id,
            ActionKind::Contribute,
        ));
        tracing::info!(item_id = %item_id, contribution_id = %contribution.id, "Contribution recorded");
        Ok(contribution)
    }
}
