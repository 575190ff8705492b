use ulid::Ulid;

use crate::model::{DrawPhase, Size, Unit};

/// Why a suite cannot take a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteUnavailable {
    /// Already held by this group.
    Occupied(Ulid),
    SizeMismatch { suite: Size, group: Size },
    Restricted(Size),
    Medical,
    NotInDraw,
}

impl std::fmt::Display for SuiteUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteUnavailable::Occupied(group) => write!(f, "occupied by group {group}"),
            SuiteUnavailable::SizeMismatch { suite, group } => {
                write!(f, "suite holds {suite}, group has size {group}")
            }
            SuiteUnavailable::Restricted(size) => write!(f, "size {size} is restricted"),
            SuiteUnavailable::Medical => write!(f, "medical suite requires override"),
            SuiteUnavailable::NotInDraw => write!(f, "suite is not part of this draw"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTransition {
        from: DrawPhase,
        to: DrawPhase,
    },
    Precondition(String),
    Oversubscribed {
        sizes: Vec<Size>,
    },
    IncompleteAllocation {
        units: Vec<Unit>,
    },
    AssignmentConflict(Unit),
    SuiteUnavailable {
        suite: Ulid,
        reason: SuiteUnavailable,
    },
    OutOfTurn(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            EngineError::Oversubscribed { sizes } => {
                write!(f, "oversubscribed sizes: {sizes:?}")
            }
            EngineError::IncompleteAllocation { units } => {
                let units: Vec<String> = units.iter().map(|u| u.to_string()).collect();
                write!(f, "units without a suite: [{}]", units.join(", "))
            }
            EngineError::AssignmentConflict(unit) => {
                write!(f, "{unit} already holds a lottery number")
            }
            EngineError::SuiteUnavailable { suite, reason } => {
                write!(f, "suite {suite} unavailable: {reason}")
            }
            EngineError::OutOfTurn(group) => write!(f, "group {group} is not up to select"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
