use guildtally_core::TierLevel;

/// Promotion thresholds for the three-level ladder.
///
/// Tenure bounds are strict (`>`), totals are inclusive (`>=`). Defaults
/// reproduce the fixed production policy.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    pub tier1_min_total: u64,
    pub tier2_min_total: u64,
    pub tier2_min_tenure_days: u64,
    pub tier3_min_total: u64,
    pub tier3_min_tenure_days: u64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            tier1_min_total: 12,
            tier2_min_total: 48,
            tier2_min_tenure_days: 42,
            tier3_min_total: 100,
            tier3_min_tenure_days: 84,
        }
    }
}

impl TierPolicy {
    /// The highest tier the user newly qualifies for, or `None`.
    ///
    /// Evaluated highest-first, so one evaluation can skip levels. A tier is
    /// never proposed while it or a higher one is already held, which makes
    /// repeated evaluation with unchanged inputs a no-op and keeps the applied
    /// sequence monotonic.
    pub fn evaluate(
        &self,
        total: u64,
        tenure_days: u64,
        held: &[TierLevel],
    ) -> Option<TierLevel> {
        let holds_at_least = |tier: TierLevel| held.iter().any(|h| *h >= tier);

        if !holds_at_least(TierLevel::Tier3)
            && tenure_days > self.tier3_min_tenure_days
            && total >= self.tier3_min_total
        {
            return Some(TierLevel::Tier3);
        }
        if !holds_at_least(TierLevel::Tier2)
            && tenure_days > self.tier2_min_tenure_days
            && total >= self.tier2_min_total
        {
            return Some(TierLevel::Tier2);
        }
        if !holds_at_least(TierLevel::Tier1) && total >= self.tier1_min_total {
            return Some(TierLevel::Tier1);
        }
        None
    }
}
