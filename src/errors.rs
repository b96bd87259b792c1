//! Unified error types for the points ledger, trip lifecycle and reward engine.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped
//! into the coarse [`ErrorKind`] classes the upper layers map onto client-facing
//! error codes.

use sea_orm::{DbErr, RuntimeErr, sqlx};
use thiserror::Error;

/// Coarse classification of an [`Error`], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input
    Validation,
    /// Illegal trip state transition
    State,
    /// Unknown user or trip
    NotFound,
    /// Lost update detected by an optimistic check
    ConcurrencyConflict,
    /// Storage or configuration failure
    System,
}

/// All errors produced by the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A zero or otherwise unusable point amount was supplied
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: i64,
    },

    /// A deduction would take the balance below zero
    #[error("Insufficient points: current {current}, required {required}")]
    InsufficientPoints {
        /// Balance at the time of the attempt
        current: i64,
        /// Points the deduction needed
        required: i64,
    },

    /// Input failed validation for a reason other than the amount
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Human-readable description of the problem
        message: String,
    },

    /// The detected transport mode has no carbon factor
    #[error("Invalid transport mode: {mode}")]
    UnknownTransportMode {
        /// The mode that could not be resolved
        mode: String,
    },

    /// No account exists for the user
    #[error("Account not found: {user_id}")]
    AccountNotFound {
        /// The user that was looked up
        user_id: String,
    },

    /// An account already exists for the user
    #[error("Account already exists: {user_id}")]
    AccountExists {
        /// The user that was being opened
        user_id: String,
    },

    /// No trip with this id belongs to the user
    #[error("Trip not found: {trip_id}")]
    TripNotFound {
        /// The trip that was looked up
        trip_id: String,
    },

    /// The user already has a trip in progress
    #[error("User {user_id} already has a trip in progress: {trip_id}")]
    TripAlreadyTracking {
        /// Owner of the trip
        user_id: String,
        /// The trip currently being tracked
        trip_id: String,
    },

    /// The trip is not in a state that allows the requested transition
    #[error("Trip {trip_id} is {status}, expected tracking")]
    InvalidTripState {
        /// The trip being transitioned
        trip_id: String,
        /// Its current status
        status: String,
    },

    /// An optimistic concurrency check failed
    #[error("Concurrent update detected for {resource}")]
    ConcurrencyConflict {
        /// The contended resource
        resource: String,
    },

    /// Rewards for the period were already distributed or are being distributed
    #[error("Rewards already distributed for {reward_type} {period_key}")]
    AlreadyDistributed {
        /// `DAILY` or `MONTHLY`
        reward_type: String,
        /// The period that was already claimed
        period_key: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
    },

    /// Storage failure, including conflicts that survived every retry
    #[error("System error: {message}")]
    System {
        /// Human-readable description of the problem
        message: String,
    },

    /// Error from the database layer
    #[error("Database error: {0}")]
    Database(DbErr),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required environment variable was missing or invalid
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Classifies the error into the propagation taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::InsufficientPoints { .. }
            | Self::InvalidInput { .. }
            | Self::UnknownTransportMode { .. }
            | Self::AccountExists { .. } => ErrorKind::Validation,
            Self::TripAlreadyTracking { .. }
            | Self::InvalidTripState { .. }
            | Self::AlreadyDistributed { .. } => ErrorKind::State,
            Self::AccountNotFound { .. } | Self::TripNotFound { .. } => ErrorKind::NotFound,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::Config { .. }
            | Self::System { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::EnvVar(_) => ErrorKind::System,
        }
    }

    /// Stable error code surfaced to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::InvalidInput { .. } | Self::UnknownTransportMode { .. } => "PARAM_ERROR",
            Self::AccountNotFound { .. } => "USER_NOT_FOUND",
            Self::AccountExists { .. } => "USER_EXISTS",
            Self::TripNotFound { .. } => "TRIP_NOT_FOUND",
            Self::TripAlreadyTracking { .. } => "TRIP_ALREADY_TRACKING",
            Self::InvalidTripState { .. } => "TRIP_STATUS_ERROR",
            Self::AlreadyDistributed { .. } => "REWARD_ALREADY_DISTRIBUTED",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::Config { .. }
            | Self::System { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::EnvVar(_) => "SYSTEM_ERROR",
        }
    }
}

impl From<DbErr> for Error {
    /// Lock contention between writers surfaces as a conflict so callers
    /// retry it like a failed version check.
    fn from(err: DbErr) -> Self {
        if is_lock_contention(&err) {
            Self::ConcurrencyConflict {
                resource: format!("database ({err})"),
            }
        } else {
            Self::Database(err)
        }
    }
}

/// SQLite `BUSY` or `LOCKED`, including their extended result codes.
fn is_lock_contention(err: &DbErr) -> bool {
    let (DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
    | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e)))) = err
    else {
        return false;
    };
    e.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
