//! Joins a node to a replicated data store's replica group.
//!
//! A [`ReplicaSet`] connects through a seed list (falling back to the data
//! store on this host), initiates a new replica group when none exists, and
//! otherwise adds the node with a forced reconfiguration that evicts unhealthy
//! members in the same step. Every wait is bounded and can be cancelled.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;
mod connection;
mod controller;
mod document;
mod error;
mod initiate;
mod reconfig;
mod state;
mod status;
mod wait;

pub use config::{
    CONNECT_ATTEMPTS, CONNECT_WAIT, DEFAULT_PORT, INIT_ATTEMPTS, INIT_WAIT, RECONFIG_ATTEMPTS,
    RECONFIG_WAIT, RECONNECT_DELAY, ReplicaSetOptions, RetryPolicy, SecurityData, Timings,
};
pub use connection::ConnectionManager;
pub use controller::{ADMIN_ROLES, JoinAction, JoinReport, ReplicaSet};
pub use document::{GroupConfig, MemberEntry, MemberStatus, StatusSnapshot};
pub use error::{Error, Result};
pub use initiate::{InitiateOutcome, initiate, is_already_initialized};
pub use reconfig::{
    EvictionPlan, EvictionSkip, JOINED_STATES, MembershipChange, ReconfigOutcome, Reconfigurer,
    add_or_replace, plan_membership,
};
pub use state::{ALIVE_STATES, MemberState, UNMAPPED_STATE_NAME, is_alive_code, role_name};
pub use status::{GroupLookup, StatusReader};
pub use wait::{RoleWaiter, WaitOutcome};
