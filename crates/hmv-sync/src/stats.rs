//! Summaries and filters over the cached achievement dataset.

use std::collections::BTreeMap;

use hmv_core::{AchievementRecord, RankTier};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AchievementStats {
    pub total: usize,
    /// Lowercased difficulty label to count, in label order.
    pub by_difficulty: BTreeMap<String, usize>,
    pub authored: usize,
    pub first_bloods: usize,
    pub top3: usize,
}

impl AchievementStats {
    pub fn compute(records: &[AchievementRecord]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            let difficulty = match record.difficulty.trim() {
                "" => "unknown".to_string(),
                label => label.to_lowercase(),
            };
            *stats.by_difficulty.entry(difficulty).or_default() += 1;

            match record.rank_tier() {
                RankTier::Author => stats.authored += 1,
                RankTier::First => stats.first_bloods += 1,
                RankTier::Top3 => stats.top3 += 1,
                RankTier::Other(_) | RankTier::Unranked => {}
            }
        }
        stats
    }
}

/// Exact, case-insensitive filters on machine title and nickname.
#[derive(Debug, Clone, Default)]
pub struct AchievementFilter {
    pub vm: Option<String>,
    pub user: Option<String>,
}

impl AchievementFilter {
    pub fn matches(&self, record: &AchievementRecord) -> bool {
        let eq = |wanted: &Option<String>, actual: &str| {
            wanted
                .as_deref()
                .map_or(true, |wanted| wanted.trim().eq_ignore_ascii_case(actual.trim()))
        };
        eq(&self.vm, &record.vm_title) && eq(&self.user, &record.nickname)
    }

    pub fn apply(&self, records: Vec<AchievementRecord>) -> Vec<AchievementRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// The last `limit` records in reverse order, or every record reversed when `limit` is `None`.
pub fn recent_first(records: &[AchievementRecord], limit: Option<usize>) -> Vec<&AchievementRecord> {
    let start = limit.map_or(0, |limit| records.len().saturating_sub(limit));
    records[start..].iter().rev().collect()
}
