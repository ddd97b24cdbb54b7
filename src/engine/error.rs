use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Room or reservation does not exist.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Missing or malformed request field, or an empty/inverted stay.
    Validation(String),
    /// Admission refused: the stay collides with an active reservation.
    DatesUnavailable { room_id: Ulid, conflicting: Ulid },
    /// Gateway callback failed verification. Nothing was changed.
    SignatureRejected(String),
    /// Room still referenced by reservations.
    RoomInUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::DatesUnavailable {
                room_id,
                conflicting,
            } => write!(
                f,
                "dates unavailable: room {room_id} already reserved by {conflicting}"
            ),
            EngineError::SignatureRejected(order_id) => {
                write!(f, "payment notification rejected: bad signature for order {order_id}")
            }
            EngineError::RoomInUse(id) => {
                write!(f, "cannot delete room {id}: reservations still reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
