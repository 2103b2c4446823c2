//! Engine configuration.

use chrono::Duration;
use rustc_hash::FxHashMap;

use crate::types::AgeGroup;

/// Tunable behavior of the engine, fixed per engine instance.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Route to `mark_auto_rejected` when the aggregate carries hard
    /// violations, instead of surfacing them to a human reviewer.
    pub auto_reject_on_hard_fail: bool,
    /// Extra generation passes a media guardrail may spend per item.
    /// Values above 1 are allowed but strongly discouraged.
    pub media_retry_max: u32,
    /// Fear-intensity threshold per age band; above it a violation is
    /// recorded (hard above 0.7).
    pub fear_threshold_by_age: FxHashMap<AgeGroup, f64>,
    /// Violence severity above which a detection is hard, per age band.
    pub violence_hard_threshold_by_age: FxHashMap<AgeGroup, f64>,
    /// How long a suspended thread waits for a reviewer before the sweeper
    /// rejects it.
    pub review_deadline: Duration,
    /// Bound on concurrently running handlers per thread.
    pub worker_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let fear_threshold_by_age = FxHashMap::from_iter([
            (AgeGroup::Preschool, 0.3),
            (AgeGroup::EarlyReader, 0.4),
            (AgeGroup::MiddleGrade, 0.5),
        ]);
        let violence_hard_threshold_by_age = FxHashMap::from_iter([
            (AgeGroup::Preschool, 0.4),
            (AgeGroup::EarlyReader, 0.6),
            (AgeGroup::MiddleGrade, 0.7),
        ]);
        Self {
            auto_reject_on_hard_fail: true,
            media_retry_max: 1,
            fear_threshold_by_age,
            violence_hard_threshold_by_age,
            review_deadline: Duration::days(3),
            worker_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl EngineConfig {
    /// Fear threshold for an age band (spec default for the band if the map
    /// was thinned out).
    #[must_use]
    pub fn fear_threshold(&self, age_group: AgeGroup) -> f64 {
        self.fear_threshold_by_age
            .get(&age_group)
            .copied()
            .unwrap_or(match age_group {
                AgeGroup::Preschool => 0.3,
                AgeGroup::EarlyReader => 0.4,
                AgeGroup::MiddleGrade => 0.5,
            })
    }

    /// Violence hard threshold for an age band.
    #[must_use]
    pub fn violence_hard_threshold(&self, age_group: AgeGroup) -> f64 {
        self.violence_hard_threshold_by_age
            .get(&age_group)
            .copied()
            .unwrap_or(match age_group {
                AgeGroup::Preschool => 0.4,
                AgeGroup::EarlyReader => 0.6,
                AgeGroup::MiddleGrade => 0.7,
            })
    }
}
