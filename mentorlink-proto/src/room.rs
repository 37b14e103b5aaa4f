//! Two-party room keys.

use std::fmt;

/// Deterministic key for the room shared by exactly two participants.
///
/// The key does not depend on which participant computes it: both ids are
/// ordered before joining, so `between(a, b) == between(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    low: String,
    high: String,
}

impl RoomKey {
    /// Build the key for the room shared by `a` and `b`.
    #[must_use]
    pub fn between(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    /// Whether `participant` is one of the two members of this room.
    #[must_use]
    pub fn includes(&self, participant: &str) -> bool {
        self.low == participant || self.high == participant
    }

    /// The member that is not `participant`, if `participant` is a member.
    #[must_use]
    pub fn counterpart_of(&self, participant: &str) -> Option<&str> {
        if self.low == participant {
            Some(&self.high)
        } else if self.high == participant {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.low, self.high)
    }
}
