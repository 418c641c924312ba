//! Lease table data model.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeaseError;

const MAX_SESSION_ID_LEN: usize = 128;

/// Identifier of a session.
///
/// Ids double as directory names under the sessions base directory, so only
/// ASCII alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, LeaseError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(LeaseError::InvalidSessionId(raw.to_string()))
        }
    }

    pub fn from_number(n: u64) -> Self {
        Self(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, if it is a plain unsigned integer.
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for SessionId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SessionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = LeaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = LeaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Lease status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Available,
    Locked,
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseStatus::Available => write!(f, "available"),
            LeaseStatus::Locked => write!(f, "locked"),
        }
    }
}

/// One persisted session.
///
/// `status` and `lease_acquired_at` only change through [`SessionRecord::lock`]
/// and [`SessionRecord::unlock`], which keeps them consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub status: LeaseStatus,
    pub lease_acquired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: LeaseStatus::Available,
            lease_acquired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == LeaseStatus::Available
    }

    pub fn is_locked(&self) -> bool {
        self.status == LeaseStatus::Locked
    }

    pub fn lock(&mut self, now: DateTime<Utc>) {
        self.status = LeaseStatus::Locked;
        self.lease_acquired_at = Some(now);
    }

    pub fn unlock(&mut self) {
        self.status = LeaseStatus::Available;
        self.lease_acquired_at = None;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// A locked record is expired once its lease is strictly older than `ttl`.
    /// A locked record without a timestamp can never be renewed, so it counts
    /// as expired too.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if !self.is_locked() {
            return false;
        }
        match self.lease_acquired_at {
            Some(acquired) => now - acquired > ttl,
            None => true,
        }
    }
}

/// Whole persisted lease table, ordered by [`SessionId`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseTable {
    sessions: BTreeMap<SessionId, SessionRecord>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn insert(&mut self, id: SessionId, record: SessionRecord) -> Option<SessionRecord> {
        self.sessions.insert(id, record)
    }

    /// Records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &SessionRecord)> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SessionId, &mut SessionRecord)> {
        self.sessions.iter_mut()
    }

    /// Next id for an auto-numbered session: one past the largest numeric id.
    pub fn next_id(&self) -> SessionId {
        let max = self
            .sessions
            .keys()
            .filter_map(SessionId::as_number)
            .max()
            .unwrap_or(0);
        SessionId::from_number(max.saturating_add(1))
    }
}
