//! Domain types for the wishlist engine.
//!
//! Lists, items, reservations and contributions mirror the rows of the remote
//! store. Identifiers are UUID newtypes so an item id can never be passed
//! where a reservation id is expected.

use crate::error::ValidationError;
use crate::guest::GuestIdentityStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a list
    ListId
);
id_type!(
    /// Identifier of an item
    ItemId
);
id_type!(
    /// Identifier of a reservation row
    ReservationId
);
id_type!(
    /// Identifier of a contribution row
    ContributionId
);
id_type!(
    /// Identifier of an authenticated account
    UserId
);
id_type!(
    /// Correlates a command with its result action
    OperationId
);

/// Amount of money in minor units (two decimal places)
///
/// On the wire an amount is a decimal in currency units (`1999.99`), as the
/// remote store keeps prices and contributions. Numeric strings are accepted
/// too; more than two decimals are rejected.
///
/// # Example
///
/// ```
/// use wishlist_engine::types::Money;
///
/// let price = Money::parse("1999,50").unwrap();
/// assert_eq!(price.minor_units(), 199_950);
/// assert_eq!(price.to_string(), "1999.50");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units (cents)
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Creates an amount from whole currency units
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    /// Whether the amount is strictly greater than zero
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Saturating addition
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Difference, floored at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let diff = self.0.saturating_sub(other.0);
        if diff < 0 { Self(0) } else { Self(diff) }
    }

    /// Parses user input such as `1999`, `1999.99` or `1999,99`
    ///
    /// Surrounding whitespace is ignored and a decimal comma is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPrice`] for empty input, anything
    /// that is not a plain non-negative decimal, more than two decimals, or
    /// values that overflow.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().replace(',', ".");
        let (whole, fraction) = match normalized.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (normalized.as_str(), ""),
        };

        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty())
            || !is_digits(whole)
            || !is_digits(fraction)
            || fraction.len() > 2
        {
            return Err(ValidationError::InvalidPrice);
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| ValidationError::InvalidPrice)?
        };
        let cents: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| ValidationError::InvalidPrice)? * 10,
            _ => fraction.parse().map_err(|_| ValidationError::InvalidPrice)?,
        };

        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .map(Self)
            .ok_or(ValidationError::InvalidPrice)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    #[allow(clippy::cast_precision_loss)] // Exact below 2^53 minor units
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % 100 == 0 {
            serializer.serialize_i64(self.0 / 100)
        } else {
            serializer.serialize_f64(self.0 as f64 / 100.0)
        }
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

struct MoneyVisitor;

impl serde::de::Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a non-negative decimal amount with at most two decimals")
    }

    fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Money, E> {
        if value < 0 {
            return Err(E::custom(format!("negative amount {value}")));
        }
        value
            .checked_mul(100)
            .map(Money)
            .ok_or_else(|| E::custom(format!("amount {value} overflows")))
    }

    fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Money, E> {
        let value = i64::try_from(value).map_err(|_| E::custom(format!("amount {value} overflows")))?;
        self.visit_i64(value)
    }

    fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<Money, E> {
        // Display prints the shortest decimal that reads back as `value`.
        self.visit_str(&value.to_string())
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Money, E> {
        Money::parse(value).map_err(|_| E::custom(format!("invalid amount {value:?}")))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

/// Self-chosen guest display name (trimmed, never empty)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GuestName(String);

impl GuestName {
    /// Validates a display name
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingGuestName`] if the trimmed input is empty.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingGuestName);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The name as entered (trimmed)
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GuestName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GuestName> for String {
    fn from(name: GuestName) -> Self {
        name.0
    }
}

impl std::fmt::Display for GuestName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A wishlist owned by one account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    /// Unique identifier
    pub id: ListId,
    /// Title shown to guests
    pub title: String,
    /// Optional date of the occasion
    pub event_date: Option<NaiveDate>,
    /// Owning account
    pub owner_id: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One desired thing inside a list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier
    pub id: ItemId,
    /// Parent list
    pub list_id: ListId,
    /// Display name (required)
    pub name: String,
    /// Link to a shop page
    pub url: Option<String>,
    /// Price, absent when unknown
    pub price: Option<Money>,
    /// Picture of the item
    pub image_url: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// The price if it is positive, which is what makes an item fundable
    #[must_use]
    pub fn valid_price(&self) -> Option<Money> {
        self.price.filter(|price| price.is_positive())
    }
}

/// A guest's claim on an item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique identifier
    pub id: ReservationId,
    /// Claimed item
    pub item_id: ItemId,
    /// Display name of the guest who claimed
    pub reserver_name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A partial pledge toward an item's price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Unique identifier
    pub id: ContributionId,
    /// Funded item
    pub item_id: ItemId,
    /// Display name of the contributor
    pub contributor_name: String,
    /// Pledged amount
    pub amount: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// What a guest did to an item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Reserved the item
    Claim,
    /// Pledged money toward it
    Contribute,
}

/// Client-side memory of one of the guest's own actions
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestActionRecord {
    /// List the item belongs to
    pub list_id: ListId,
    /// Item acted on
    pub item_id: ItemId,
    /// Kind of action
    pub kind: ActionKind,
}

impl GuestActionRecord {
    /// Creates a record
    #[must_use]
    pub const fn new(list_id: ListId, item_id: ItemId, kind: ActionKind) -> Self {
        Self {
            list_id,
            item_id,
            kind,
        }
    }
}

/// Who is looking at a list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Viewer {
    /// The account that owns the list
    Owner {
        /// Owner account
        user_id: UserId,
    },
    /// Anyone else, optionally with a chosen display name
    Guest {
        /// Display name, absent until the guest picks one
        name: Option<GuestName>,
    },
}

impl Viewer {
    /// Decides the viewer's role for `list`
    ///
    /// The signed-in account owning the list is the owner. Everyone else,
    /// including other signed-in accounts, is a guest identified by the name
    /// kept in the guest store.
    #[must_use]
    pub fn resolve(
        list: &List,
        current_user: Option<UserId>,
        guests: &dyn GuestIdentityStore,
    ) -> Self {
        match current_user {
            Some(user_id) if user_id == list.owner_id => Self::Owner { user_id },
            _ => Self::Guest {
                name: guests.guest_name(),
            },
        }
    }

    /// Whether this is the list owner
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        matches!(self, Self::Owner { .. })
    }

    /// The guest's display name, if any
    #[must_use]
    pub const fn guest_name(&self) -> Option<&GuestName> {
        match self {
            Self::Guest { name } => name.as_ref(),
            Self::Owner { .. } => None,
        }
    }
}
