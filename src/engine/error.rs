use chrono::NaiveDate;
use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed input, rejected before any work.
    Validation(&'static str),
    /// Window start_time >= end_time, or a bad day number.
    InvalidWindow { day: u8 },
    /// Candidate falls (partly) outside every active availability window.
    OutsideAvailability { date: NaiveDate },
    /// Candidate overlaps a committed occurrence on an exclusive resource.
    Overlap { date: NaiveDate, existing: Ulid },
    /// Occurrence already at capacity.
    CapacityFull(Ulid),
    /// Series expansion exceeds the configured occurrence cap.
    RangeTooLarge { count: usize, max: usize },
    LimitExceeded(&'static str),
    /// Storage-layer failure; safe to retry because occurrence identity is
    /// deterministic.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InvalidWindow { day } => {
                write!(f, "invalid availability window for day {day}")
            }
            EngineError::OutsideAvailability { date } => {
                write!(f, "{date}: outside the resource's availability window")
            }
            EngineError::Overlap { date, existing } => {
                write!(f, "{date}: overlaps existing occurrence {existing}")
            }
            EngineError::CapacityFull(id) => write!(f, "occurrence {id} is full"),
            EngineError::RangeTooLarge { count, max } => {
                write!(f, "series expands to {count} occurrences, maximum is {max}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
