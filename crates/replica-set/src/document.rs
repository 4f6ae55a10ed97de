//! Typed views of the documents exchanged with the data store.
//!
//! Fields the controller does not interpret are kept in `extra` so a
//! read-modify-reconfig cycle writes them back untouched.

use crate::state::MemberState;

use proven_datastore::Document;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// The data store reports several integral fields as doubles.
#[allow(clippy::cast_possible_truncation)]
fn integral<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;

    number
        .as_i64()
        .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .ok_or_else(|| D::Error::custom(format!("expected an integer, found {number}")))
}

fn optional_integral<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    integral(deserializer).map(Some)
}

/// One member of a replica group configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberEntry {
    /// Member id, unique within the configuration.
    #[serde(rename = "_id", deserialize_with = "integral")]
    pub id: i64,

    /// `host:port` of the member.
    pub host: String,

    /// Election priority; 0 never becomes primary.
    #[serde(
        default,
        deserialize_with = "optional_integral",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<i64>,

    /// Hidden members are invisible to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,

    /// Member fields not interpreted here (votes, tags, ...).
    #[serde(flatten)]
    pub extra: Document,
}

impl MemberEntry {
    /// A bare entry, as used by initiation.
    pub fn new(id: i64, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            priority: None,
            hidden: None,
            extra: Document::new(),
        }
    }

    /// An entry for a joining member. Invisible members get priority 0 and are hidden.
    pub fn joining(id: i64, host: impl Into<String>, visible: bool) -> Self {
        Self {
            priority: Some(i64::from(visible)),
            hidden: Some(!visible),
            ..Self::new(id, host)
        }
    }
}

/// The persisted replica group configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Replica group id.
    #[serde(rename = "_id")]
    pub id: String,

    /// Configuration version, increased by every accepted reconfiguration.
    #[serde(
        default,
        deserialize_with = "optional_integral",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<i64>,

    /// Members in configuration order.
    #[serde(default)]
    pub members: Vec<MemberEntry>,

    /// Configuration fields not interpreted here (settings, protocol version, ...).
    #[serde(flatten)]
    pub extra: Document,
}

impl GroupConfig {
    /// A fresh single-member configuration for initiation. Carries no version;
    /// the data store assigns the first one.
    pub fn initial(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            members: vec![MemberEntry::new(0, host)],
            extra: Document::new(),
        }
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document lacks an `_id` or has malformed members.
    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document))
    }

    /// Serializes the configuration back into a document value.
    ///
    /// # Errors
    ///
    /// Returns an error if an `extra` field cannot be represented.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Whether a member with this `host:port` is configured.
    #[must_use]
    pub fn contains_host(&self, host: &str) -> bool {
        self.members.iter().any(|member| member.host == host)
    }

    /// Hosts in configuration order.
    #[must_use]
    pub fn member_hosts(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.host.as_str()).collect()
    }

    /// One past the highest member id; ids of removed members are never reused.
    #[must_use]
    pub fn next_member_id(&self) -> i64 {
        self.members
            .iter()
            .map(|member| member.id)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Increments the version if the document carries one and returns the new value.
    pub fn bump_version(&mut self) -> Option<i64> {
        if let Some(version) = self.version.as_mut() {
            *version += 1;
        }

        self.version
    }
}

/// Status of one member as seen by the node answering the status command.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct MemberStatus {
    /// `host:port` of the member.
    pub name: String,

    /// Raw state code.
    #[serde(deserialize_with = "integral")]
    pub state: i64,

    /// 1 if the member is reachable, 0 otherwise.
    #[serde(default, deserialize_with = "integral")]
    pub health: i64,
}

impl MemberStatus {
    /// The mapped state, `None` for codes outside the state table.
    #[must_use]
    pub const fn member_state(&self) -> Option<MemberState> {
        MemberState::from_code(self.state)
    }

    /// Reachable and in an alive state. Everything else is a removal candidate.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.health == 1 && crate::state::is_alive_code(self.state)
    }
}

/// A point-in-time read of replica group status.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct StatusSnapshot {
    /// Replica group id.
    #[serde(default)]
    pub set: Option<String>,

    /// Every member known to the answering node.
    #[serde(default)]
    pub members: Vec<MemberStatus>,
}

impl StatusSnapshot {
    /// Parses a status reply.
    ///
    /// # Errors
    ///
    /// Returns an error if a member entry is malformed.
    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document))
    }

    /// Looks up a member by `host:port`.
    #[must_use]
    pub fn member(&self, host: &str) -> Option<&MemberStatus> {
        self.members.iter().find(|member| member.name == host)
    }

    /// The mapped state of a member, `None` if it is absent or unmapped.
    #[must_use]
    pub fn state_of(&self, host: &str) -> Option<MemberState> {
        self.member(host).and_then(MemberStatus::member_state)
    }

    /// Member hosts in reported order.
    #[must_use]
    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|member| member.name.clone()).collect()
    }

    /// Hosts of members that are unreachable or in a non-alive state.
    #[must_use]
    pub fn unhealthy_members(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|member| !member.is_healthy())
            .map(|member| member.name.clone())
            .collect()
    }
}
