//! Error types for coordination operations.
//!
//! Every failure a user can trigger falls into one category: bad input
//! ([`ValidationError`]), a rule blocked by other guests' actions
//! ([`ConflictError`]), a failed remote call, or a record that vanished.

use crate::remote::{RemoteError, Table};
use crate::types::Money;
use thiserror::Error;
use wishlist_runtime::StoreError;

/// Result type alias for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Bad user input. Shown inline, fixed by editing the form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Item name left blank.
    #[error("Item name is required")]
    MissingItemName,

    /// List title left blank.
    #[error("List title is required")]
    MissingListTitle,

    /// Guest has not chosen a display name.
    #[error("Please enter your name first")]
    MissingGuestName,

    /// Price is not a non-negative decimal with at most two places.
    #[error("Price must be a non-negative number")]
    InvalidPrice,

    /// Contribution amount is not a positive number.
    #[error("Amount must be a positive number")]
    InvalidAmount,

    /// Contribution below the configured floor.
    #[error("Minimum contribution is {minimum}")]
    BelowMinimum {
        /// Configured minimum
        minimum: Money,
    },

    /// Contribution larger than what is still missing.
    #[error("Only {remaining} is still needed")]
    ExceedsRemaining {
        /// Amount still missing
        remaining: Money,
    },
}

/// A coordination rule blocked the action. The user should pick another item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Someone else holds the reservation.
    #[error("Already claimed by {holder}")]
    AlreadyClaimed {
        /// Display name of the current holder
        holder: String,
    },

    /// Item has no positive price.
    #[error("This item has no price and cannot be funded")]
    NotFundable,

    /// Contributions already cover the price.
    #[error("This item is already fully funded")]
    AlreadyFunded,
}

/// Top-level error returned by every coordination operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    // ═══════════════════════════════════════════════════════════
    // User-facing rule violations
    // ═══════════════════════════════════════════════════════════
    /// Invalid input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Blocked by the current state of the item.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    // ═══════════════════════════════════════════════════════════
    // Remote store failures
    // ═══════════════════════════════════════════════════════════
    /// A read or write against the remote store failed.
    #[error("Remote store error: {0}")]
    Remote(String),

    /// The record was deleted concurrently.
    #[error("{table} {id} not found")]
    NotFound {
        /// Table searched
        table: Table,
        /// Missing record id
        id: String,
    },

    // ═══════════════════════════════════════════════════════════
    // View lifecycle
    // ═══════════════════════════════════════════════════════════
    /// The list view has not finished loading.
    #[error("The list is still loading")]
    NotReady,

    /// The list view was closed.
    #[error("The list view is closed")]
    Closed,
}

impl CoordinationError {
    /// Short machine-readable category, used as a log field
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Remote(_) => "remote",
            Self::NotFound { .. } => "not_found",
            Self::NotReady | Self::Closed => "lifecycle",
        }
    }

    /// Whether repeating the same action may succeed
    ///
    /// Only remote failures are transient. Validation and conflicts need a
    /// different input; a missing record is corrected by the next change event.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Text to show the user
    ///
    /// Remote failures are degraded to a generic message; the details go to
    /// the log only.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(_) => "Something went wrong, please try again".to_string(),
            Self::NotFound { .. } => "This entry no longer exists".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RemoteError> for CoordinationError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::NotFound { table, id } => Self::NotFound { table, id },
            other => Self::Remote(other.to_string()),
        }
    }
}

impl From<StoreError> for CoordinationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ShutdownInProgress | StoreError::ChannelClosed => Self::Closed,
            StoreError::Timeout => Self::Remote("timed out waiting for a result".to_string()),
            StoreError::EffectFailed(reason) => Self::Remote(reason),
        }
    }
}
