//! Plan tier definitions.
//!
//! Represents the subscription tiers available in Attuned.

use serde::{Deserialize, Serialize};

/// Subscription plan tier.
///
/// Determines which product features an active subscription unlocks.
/// Terminal records (canceled, expired) retain their tier for the
/// historical record and win-back flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Core coaching: daily assessments, matchups, daily logs, meetings.
    Standard,

    /// Everything in standard, plus therapist integration, calendar sync
    /// and extended video content.
    Premium,
}

impl PlanTier {
    /// Returns the display name for this tier.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlanTier::Standard => "Standard",
            PlanTier::Premium => "Premium",
        }
    }

    /// Returns the numeric rank of this tier for comparison.
    pub fn rank(&self) -> u8 {
        match self {
            PlanTier::Standard => 1,
            PlanTier::Premium => 2,
        }
    }

    /// Parses a tier from its wire representation.
    ///
    /// Checkout metadata carries the tier as a lowercase string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(PlanTier::Standard),
            "premium" => Some(PlanTier::Premium),
            _ => None,
        }
    }

    /// The wire representation used in checkout metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Standard => "standard",
            PlanTier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_outranks_standard() {
        assert!(PlanTier::Premium.rank() > PlanTier::Standard.rank());
    }

    #[test]
    fn parse_roundtrips_wire_format() {
        for tier in [PlanTier::Standard, PlanTier::Premium] {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(tier));
        }
    }

    #[test]
    fn parse_rejects_unknown_tier() {
        assert_eq!(PlanTier::parse("platinum"), None);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&PlanTier::Premium).unwrap();
        assert_eq!(json, "\"premium\"");
    }

    #[test]
    fn deserializes_from_lowercase() {
        let tier: PlanTier = serde_json::from_str("\"standard\"").unwrap();
        assert_eq!(tier, PlanTier::Standard);
    }
}
