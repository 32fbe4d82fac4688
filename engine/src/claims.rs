//! Claim coordinator.
//!
//! At most one reservation per item. The remote store gives no atomic
//! check-and-insert, so the rule is enforced in two steps:
//!
//! 1. Before writing, the locally known reservations are checked.
//! 2. After writing, the item's reservations are read back. If an earlier
//!    reservation by someone else exists, this write lost the race and its
//!    row is deleted again.
//!
//! Every client ranks reservations the same way (earliest `created_at`,
//! then id), so all views agree on the holder even while a losing row is
//! still visible.

use crate::error::{ConflictError, CoordinationError, Result};
use crate::guest::GuestIdentityStore;
use crate::remote::{Filter, OrderBy, RemoteCollection, RemoteError, Table, decode_row, decode_rows};
use crate::types::{ActionKind, GuestActionRecord, GuestName, ItemId, ListId, Reservation, ReservationId};
use serde_json::json;
use std::sync::Arc;

/// The reservation that counts: earliest creation time, ties broken by id
#[must_use]
pub fn holder<'a, I>(reservations: I) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    reservations
        .into_iter()
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

/// What a claim attempt should do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Nobody holds the item; write a reservation
    Reserve,
    /// The guest already holds it; nothing to do
    AlreadyHeld,
}

/// Check a claim against the known reservations of one item
///
/// # Errors
///
/// Returns [`ConflictError::AlreadyClaimed`] when another name holds it.
pub fn check_claim<'a, I>(
    reservations: I,
    guest: &GuestName,
) -> std::result::Result<ClaimDecision, ConflictError>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    match holder(reservations) {
        None => Ok(ClaimDecision::Reserve),
        Some(r) if r.reserver_name == guest.as_str() => Ok(ClaimDecision::AlreadyHeld),
        Some(r) => Err(ConflictError::AlreadyClaimed {
            holder: r.reserver_name.clone(),
        }),
    }
}

/// Ids of the reservations held by `guest`
pub fn held_by<'a, I>(reservations: I, guest: &'a GuestName) -> impl Iterator<Item = ReservationId> + 'a
where
    I: IntoIterator<Item = &'a Reservation>,
    I::IntoIter: 'a,
{
    reservations
        .into_iter()
        .filter(move |r| r.reserver_name == guest.as_str())
        .map(|r| r.id)
}

/// Performs claim and release writes
#[derive(Clone)]
pub struct ClaimCoordinator {
    remote: Arc<dyn RemoteCollection>,
    guests: Arc<dyn GuestIdentityStore>,
}

impl ClaimCoordinator {
    /// Coordinator over a store and a guest journal
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteCollection>, guests: Arc<dyn GuestIdentityStore>) -> Self {
        Self { remote, guests }
    }

    async fn reservations_of(&self, item_id: ItemId) -> Result<Vec<Reservation>> {
        let rows = self
            .remote
            .query(
                Table::Reservations,
                Filter::eq("item_id", item_id),
                Some(OrderBy::asc("created_at")),
            )
            .await?;
        Ok(decode_rows(Table::Reservations, rows)?)
    }

    /// Write a reservation for `guest` and journal it
    ///
    /// # Errors
    ///
    /// - [`ConflictError::AlreadyClaimed`] if another guest won the race
    /// - `NotFound` if the item was deleted meanwhile
    /// - other remote failures
    #[tracing::instrument(skip(self, guest), fields(guest = %guest))]
    pub async fn claim(
        &self,
        list_id: ListId,
        item_id: ItemId,
        guest: &GuestName,
    ) -> Result<Reservation> {
        let inserted = self
            .remote
            .insert(
                Table::Reservations,
                json!({ "item_id": item_id, "reserver_name": guest.as_str() }),
            )
            .await;

        let reservation: Reservation = match inserted {
            Ok(row) => decode_row(Table::Reservations, row)?,
            Err(RemoteError::Conflict { .. }) => {
                // A unique index answered for us; report who holds it.
                let existing = self.reservations_of(item_id).await?;
                let current = holder(&existing).map_or_else(String::new, |r| r.reserver_name.clone());
                return Err(ConflictError::AlreadyClaimed { holder: current }.into());
            },
            Err(e) => return Err(e.into()),
        };

        let existing = self.reservations_of(item_id).await?;
        if let Some(winner) = holder(&existing) {
            if winner.reserver_name != guest.as_str() {
                tracing::info!(item_id = %item_id, holder = %winner.reserver_name, "Lost claim race, withdrawing");
                if let Err(e) = self
                    .remote
                    .delete(Table::Reservations, *reservation.id.as_uuid())
                    .await
                {
                    tracing::warn!(error = %e, "Failed to withdraw losing reservation");
                }
                return Err(ConflictError::AlreadyClaimed {
                    holder: winner.reserver_name.clone(),
                }
                .into());
            }
        }

        self.guests
            .log_action(GuestActionRecord::new(list_id, item_id, ActionKind::Claim));
        tracing::info!(item_id = %item_id, reservation_id = %reservation.id, "Item claimed");
        Ok(reservation)
    }

    /// Delete the given reservations and forget the claim
    ///
    /// Rows that are already gone count as released. Returns how many rows
    /// this call actually deleted.
    ///
    /// # Errors
    ///
    /// Returns remote failures other than `NotFound`.
    #[tracing::instrument(skip(self, reservations))]
    pub async fn release(
        &self,
        list_id: ListId,
        item_id: ItemId,
        reservations: Vec<ReservationId>,
    ) -> Result<usize> {
        let mut deleted = 0;
        for id in reservations {
            match self.remote.delete(Table::Reservations, *id.as_uuid()).await {
                Ok(()) => deleted += 1,
                Err(RemoteError::NotFound { .. }) => {
                    tracing::debug!(reservation_id = %id, "Reservation already gone");
                },
                Err(e) => return Err(CoordinationError::from(e)),
            }
        }
        self.guests
            .remove_action(&GuestActionRecord::new(list_id, item_id, ActionKind::Claim));
        tracing::info!(item_id = %item_id, deleted, "Item released");
        Ok(deleted)
    }
}
