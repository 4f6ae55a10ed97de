//! Member state codes reported by replica group status.

use std::fmt::{self, Display};

/// Name reported for codes outside the state table.
pub const UNMAPPED_STATE_NAME: &str = "NONE";

/// The state of a replica group member, keyed by the integer code the data
/// store reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MemberState {
    /// Parsing configuration, not yet an active member.
    Startup,

    /// Accepts writes.
    Primary,

    /// Replicates from the primary.
    Secondary,

    /// Catching up or performing maintenance; not readable.
    Recovering,

    /// Initial sync after joining.
    Startup2,

    /// State not yet known from the reporting node's point of view.
    Unknown,

    /// Votes in elections but holds no data.
    Arbiter,

    /// Unreachable from the reporting node.
    Down,

    /// Rolling back writes after a failover.
    Rollback,

    /// No longer part of the configuration.
    Removed,
}

/// States that do not make a member eligible for eviction.
pub const ALIVE_STATES: [MemberState; 8] = [
    MemberState::Startup,
    MemberState::Primary,
    MemberState::Secondary,
    MemberState::Recovering,
    MemberState::Startup2,
    MemberState::Unknown,
    MemberState::Arbiter,
    MemberState::Rollback,
];

impl MemberState {
    /// Maps a reported state code. Code 4 and anything past 10 are unmapped.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Startup),
            1 => Some(Self::Primary),
            2 => Some(Self::Secondary),
            3 => Some(Self::Recovering),
            5 => Some(Self::Startup2),
            6 => Some(Self::Unknown),
            7 => Some(Self::Arbiter),
            8 => Some(Self::Down),
            9 => Some(Self::Rollback),
            10 => Some(Self::Removed),
            _ => None,
        }
    }

    /// The code the data store uses for this state.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Startup => 0,
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Recovering => 3,
            Self::Startup2 => 5,
            Self::Unknown => 6,
            Self::Arbiter => 7,
            Self::Down => 8,
            Self::Rollback => 9,
            Self::Removed => 10,
        }
    }

    /// Upper-case state name as printed by the data store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "STARTUP",
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Recovering => "RECOVERING",
            Self::Startup2 => "STARTUP2",
            Self::Unknown => "UNKNOWN",
            Self::Arbiter => "ARBITER",
            Self::Down => "DOWN",
            Self::Rollback => "ROLLBACK",
            Self::Removed => "REMOVED",
        }
    }

    /// Whether a member in this state is kept during reconfiguration.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Down | Self::Removed)
    }
}

impl Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name for any reported state code; unmapped codes yield `"NONE"`.
#[must_use]
pub const fn role_name(code: i64) -> &'static str {
    match MemberState::from_code(code) {
        Some(state) => state.as_str(),
        None => UNMAPPED_STATE_NAME,
    }
}

/// Whether a reported state code counts as alive. Unmapped codes do not.
#[must_use]
pub const fn is_alive_code(code: i64) -> bool {
    match MemberState::from_code(code) {
        Some(state) => state.is_alive(),
        None => false,
    }
}
