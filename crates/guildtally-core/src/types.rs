use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type TenantId = u64;
pub type UserId = u64;

/// Minimum number of whitespace-delimited tokens for a message to count.
pub const MIN_COUNTED_TOKENS: usize = 3;

/// A single activity event as delivered by the platform event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub tenant: TenantId,
    pub user: UserId,
    pub author_is_bot: bool,
    pub author_is_owner: bool,
    pub token_count: usize,
}

impl ActivityEvent {
    /// Build an event from raw message content, deriving the token count.
    pub fn from_content(
        tenant: TenantId,
        user: UserId,
        author_is_bot: bool,
        author_is_owner: bool,
        content: &str,
    ) -> Self {
        Self {
            tenant,
            user,
            author_is_bot,
            author_is_owner,
            token_count: content.split_whitespace().count(),
        }
    }

    /// Whether this event counts toward the author's activity total.
    ///
    /// Bot-authored and tenant-owner-authored messages never count, and
    /// neither do messages shorter than [`MIN_COUNTED_TOKENS`] tokens.
    /// Live recording and bulk reconciliation share this filter.
    pub fn is_countable(&self) -> bool {
        !self.author_is_bot && !self.author_is_owner && self.token_count >= MIN_COUNTED_TOKENS
    }
}

/// Activity rank levels, granted through role assignment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TierLevel {
    Tier1,
    Tier2,
    Tier3,
}

impl TierLevel {
    /// The role label the platform sink applies for this tier.
    pub fn role_label(&self) -> &'static str {
        match self {
            TierLevel::Tier1 => "Level 1",
            TierLevel::Tier2 => "Level 2",
            TierLevel::Tier3 => "Level 3",
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role_label())
    }
}

impl FromStr for TierLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Level 1" => Ok(TierLevel::Tier1),
            "Level 2" => Ok(TierLevel::Tier2),
            "Level 3" => Ok(TierLevel::Tier3),
            other => Err(format!("unknown tier label: {other}")),
        }
    }
}

/// A persisted activity counter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRow {
    pub tenant: TenantId,
    pub user: UserId,
    pub total: u64,
}

/// A promotion decision emitted to the role sink.
///
/// The sink supersedes any lower tier the user holds; tiers are never
/// stacked and never revoked by this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTransition {
    pub tenant: TenantId,
    pub user: UserId,
    pub to: TierLevel,
}

/// Per-user counter summary, as read back for a single member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// `None` when the user has never been counted.
    pub total: Option<u64>,
    pub tenure_days: u64,
}
