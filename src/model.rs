use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ── Money ────────────────────────────────────────────────────────

/// Fixed-point currency amount with two fractional digits, stored as hundredths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(hundredths: i64) -> Self {
        Self(hundredths)
    }

    pub const fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    /// Parses `"5000"`, `"5000.5"`, `"5000.50"`. At most two fractional digits.
    pub fn parse(s: &str) -> Option<Self> {
        parse_hundredths(s).map(Self)
    }

    pub fn saturating_mul(self, n: u32) -> Self {
        Self(self.0.saturating_mul(i64::from(n)))
    }

    pub fn saturating_sub(self, other: Money) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `basis_points / 10_000` of this amount, truncated toward zero.
    pub fn percent(self, basis_points: u32) -> Self {
        Self(((i128::from(self.0) * i128::from(basis_points)) / 10_000) as i64)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Decimal string → hundredths. Shared by money amounts and percentages (basis points).
pub fn parse_hundredths(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 2
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let value = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -value } else { value })
}

// ── Status enums ─────────────────────────────────────────────────

/// Displayed room status. Available/Occupied is a cache of the last
/// reconciliation; Maintenance is an administrative override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    #[default]
    Available,
    Occupied,
    Maintenance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            /// Case-insensitive parse of the lowercase wire name.
            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(RoomStatus {
    Available => "available",
    Occupied => "occupied",
    Maintenance => "maintenance",
});

text_enum!(ReservationStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
});

text_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
});

/// Whether a reservation with these statuses takes part in conflict,
/// availability and occupancy computations.
pub fn counts_as_active(status: ReservationStatus, payment_status: PaymentStatus) -> bool {
    status != ReservationStatus::Cancelled
        && matches!(payment_status, PaymentStatus::Pending | PaymentStatus::Paid)
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// A stay on a room: the half-open instant range `[check_in, check_out)` plus
/// the clock times used to split a single day between day-use bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDateTime,
    pub check_out: NaiveDateTime,
    pub check_in_time: NaiveTime,
    pub check_out_time: NaiveTime,
}

impl Stay {
    pub fn check_in_date(&self) -> NaiveDate {
        self.check_in.date()
    }

    pub fn check_out_date(&self) -> NaiveDate {
        self.check_out.date()
    }

    /// Check-in and check-out fall on the same calendar day.
    pub fn is_single_day(&self) -> bool {
        self.check_in.date() == self.check_out.date()
    }

    pub fn covers(&self, instant: NaiveDateTime) -> bool {
        self.check_in <= instant && instant < self.check_out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub stay: Stay,
    pub guests: u32,
    pub guest_details: Vec<Guest>,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub nights: u32,
    pub total_amount: Money,
    /// Amount the guest pays up front through the gateway.
    pub advance_paid: Money,
    pub discount_amount: Option<Money>,
    /// Basis points, 1250 = 12.5%.
    pub discount_percentage: Option<u32>,
    pub final_amount: Option<Money>,
    /// Amount the gateway reported as captured.
    pub amount_paid: Option<Money>,
    pub payment_reference: Option<String>,
    pub special_requests: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        counts_as_active(self.status, self.payment_status)
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: Option<String>,
    pub rate: Money,
    /// Cached; see `engine::occupancy`.
    pub status: RoomStatus,
    /// All reservations on this room, sorted by `stay.check_in`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, name: Option<String>, rate: Money, status: RoomStatus) -> Self {
        Self {
            id,
            name,
            rate,
            status,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.check_in <= reservation.stay.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// The ActiveReservation projection every computation runs over.
    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.name.clone(),
            rate: self.rate,
            status: self.status,
        }
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// WAL record. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: Option<String>,
        rate: Money,
        status: RoomStatus,
    },
    RoomUpdated {
        id: Ulid,
        name: Option<String>,
        rate: Money,
        status: RoomStatus,
    },
    RoomDeleted {
        id: Ulid,
    },
    /// Cache write from reconciliation; never changes reservations.
    RoomStatusReconciled {
        id: Ulid,
        status: RoomStatus,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    GuestAdded {
        id: Ulid,
        room_id: Ulid,
        guest: Guest,
    },
    ReservationStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: ReservationStatus,
    },
    /// Admin-recorded payment and discount figures.
    PaymentRecorded {
        id: Ulid,
        room_id: Ulid,
        payment_status: PaymentStatus,
        discount_amount: Option<Money>,
        discount_percentage: Option<u32>,
        final_amount: Option<Money>,
    },
    /// Verified gateway callback outcome.
    PaymentNotified {
        id: Ulid,
        room_id: Ulid,
        payment_status: PaymentStatus,
        status: ReservationStatus,
        amount_paid: Option<Money>,
        payment_reference: Option<String>,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub rate: Money,
    pub status: RoomStatus,
}

/// Filter for `list_reservations`. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.room_id.is_none_or(|id| r.room_id == id)
            && self.status.is_none_or(|s| r.status == s)
            && self.payment_status.is_none_or(|p| r.payment_status == p)
    }
}

/// Read-only admission preview for a candidate stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub room_id: Ulid,
    pub available: bool,
    pub conflicting: Option<Ulid>,
    pub nights: u32,
    pub total: Money,
}
