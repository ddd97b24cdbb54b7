//! Hard resource limits. Requests beyond these fail with `LimitExceeded`
//! before anything is written.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 50_000;

/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: u32 = 365;

pub const MAX_GUESTS_PER_RESERVATION: u32 = 64;
pub const MAX_GUEST_RECORDS: usize = 32;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 512;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 4_096;
pub const MAX_PAYMENT_REFERENCE_LEN: usize = 128;
