//! Progress aggregation
//!
//! Each running phase gets a [`ProgressTracker`] that polls the phase's
//! latest snapshot on a fixed tick and folds it into the ActionSet status.
//! The overall percentage is a weighted mean over every phase that has
//! reported a percentage; phases that never reported are left out rather
//! than counted as zero. Byte counters are straight sums.
//!
//! ```text
//!   Func ──report──▶ LatestProgress ◀──poll── ProgressTracker
//!                                                  │
//!                                          reconcile::action_set
//!                                                  ▼
//!                                        status.actions[i].phases[j]
//!                                        status.progress (aggregate)
//! ```

use crate::reconcile;
use crate::resolver::{self, ResolvedAction};
use crate::store::ActionSetStore;
use chrono::{DateTime, Utc};
use skiff_crd::{ActionSetStatus, Phase, PhaseIndex, State};
use skiff_functions::Progress;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default polling period
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Relative weight of each phase in the overall percentage
pub trait PhaseWeights: Send + Sync {
    fn weight(&self, action: usize, phase: &str) -> f64;
}

/// Every phase counts the same
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformWeights;

impl PhaseWeights for UniformWeights {
    fn weight(&self, _action: usize, _phase: &str) -> f64 {
        1.0
    }
}

/// Weights looked up by the function each phase is bound to
///
/// Functions missing from the table weigh 1.
#[derive(Debug, Default, Clone)]
pub struct FuncWeights {
    weights: HashMap<(usize, String), f64>,
}

impl FuncWeights {
    pub fn new(table: &BTreeMap<String, f64>, actions: &[ResolvedAction]) -> Self {
        let mut weights = HashMap::new();
        for (i, action) in actions.iter().enumerate() {
            for phase in action.all_phases() {
                let weight = table.get(phase.func_name()).copied().unwrap_or(1.0);
                weights.insert((i, phase.name().to_string()), weight);
            }
        }
        Self { weights }
    }
}

impl PhaseWeights for FuncWeights {
    fn weight(&self, action: usize, phase: &str) -> f64 {
        self.weights
            .get(&(action, phase.to_string()))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Aggregate of every phase in a status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    /// `None` until some phase has reported a percentage
    pub percent: Option<f64>,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
    pub estimated_upload_bytes: u64,
    pub estimated_download_bytes: u64,
}

/// Fold per-phase progress into one aggregate
pub fn aggregate(status: &ActionSetStatus, weights: &dyn PhaseWeights) -> Aggregate {
    let mut agg = Aggregate::default();
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for (i, action) in status.actions.iter().enumerate() {
        for phase in action.all_phases() {
            let p = &phase.progress;
            agg.uploaded_bytes += p.uploaded_bytes;
            agg.downloaded_bytes += p.downloaded_bytes;
            agg.estimated_upload_bytes += p.estimated_upload_bytes;
            agg.estimated_download_bytes += p.estimated_download_bytes;

            if let Some(percent) = p.percent() {
                let w = weights.weight(i, &phase.name);
                weighted += w * percent;
                total_weight += w;
            }
        }
    }

    if total_weight > 0.0 {
        agg.percent = Some((weighted / total_weight).clamp(0.0, 100.0));
    }
    agg
}

/// `"100"`, `"50"`, `"33.33"`
pub fn format_percent(percent: f64) -> String {
    let rounded = (percent * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{:.2}", rounded)
    }
}

/// Recompute `status.progress`; the timestamp moves only on change
///
/// Returns whether anything changed.
pub fn refresh_action_progress(
    status: &mut ActionSetStatus,
    weights: &dyn PhaseWeights,
    now: DateTime<Utc>,
) -> bool {
    let agg = aggregate(status, weights);
    let progress = &mut status.progress;
    let mut changed = false;

    if let Some(percent) = agg.percent {
        let formatted = format_percent(percent);
        if progress.percent_completed != formatted {
            progress.percent_completed = formatted;
            changed = true;
        }
    }

    let counters = [
        (&mut progress.uploaded_bytes, agg.uploaded_bytes),
        (&mut progress.downloaded_bytes, agg.downloaded_bytes),
        (&mut progress.estimated_upload_bytes, agg.estimated_upload_bytes),
        (&mut progress.estimated_download_bytes, agg.estimated_download_bytes),
    ];
    for (stored, computed) in counters {
        if *stored != computed {
            *stored = computed;
            changed = true;
        }
    }

    if changed {
        progress.last_transition_time = Some(now);
    }
    changed
}

/// Snap the overall percentage to 100 and stamp the completing write
pub fn mark_complete(status: &mut ActionSetStatus, now: DateTime<Utc>) {
    status.progress.percent_completed = "100".to_string();
    status.progress.last_transition_time = Some(now);
    status.progress.running_phase = None;
}

/// Whether a snapshot would leave the stored phase progress unchanged
pub fn snapshot_matches(phase: &Phase, snapshot: &Progress) -> bool {
    let p = &phase.progress;
    let percent_same = match p.percent() {
        // Lower snapshots are ignored, so they count as unchanged
        Some(stored) => stored >= f64::from(snapshot.percentage),
        None => false,
    };
    percent_same
        && p.uploaded_bytes == snapshot.uploaded_bytes
        && p.downloaded_bytes == snapshot.downloaded_bytes
        && p.estimated_upload_bytes == snapshot.estimated_upload_bytes
        && p.estimated_download_bytes == snapshot.estimated_download_bytes
}

/// Fold a snapshot into a Running phase
///
/// The stored percentage never decreases; byte counters always follow
/// the snapshot. Returns whether anything changed.
pub fn apply_snapshot(phase: &mut Phase, snapshot: &Progress, now: DateTime<Utc>) -> bool {
    if phase.state != State::Running {
        return false;
    }
    let p = &mut phase.progress;
    let mut changed = false;

    let incoming = f64::from(snapshot.percentage);
    if p.percent().map(|stored| incoming > stored).unwrap_or(true) {
        p.progress_percent = format_percent(incoming);
        changed = true;
    }

    let counters = [
        (&mut p.uploaded_bytes, snapshot.uploaded_bytes),
        (&mut p.downloaded_bytes, snapshot.downloaded_bytes),
        (&mut p.estimated_upload_bytes, snapshot.estimated_upload_bytes),
        (&mut p.estimated_download_bytes, snapshot.estimated_download_bytes),
    ];
    for (stored, incoming) in counters {
        if *stored != incoming {
            *stored = incoming;
            changed = true;
        }
    }

    if changed {
        p.last_transition_time = Some(now);
    }
    changed
}

/// Polls one running phase until it stops
pub struct ProgressTracker {
    store: Arc<dyn ActionSetStore>,
    namespace: String,
    name: String,
    index: PhaseIndex,
    phase: resolver::Phase,
    weights: Arc<dyn PhaseWeights>,
    interval: Duration,
}

enum Tick {
    Continue,
    Stop,
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn ActionSetStore>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        index: PhaseIndex,
        phase: resolver::Phase,
        weights: Arc<dyn PhaseWeights>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            name: name.into(),
            index,
            phase,
            weights,
            interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the phase is terminal, the ActionSet is gone or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(&cancel).await {
                Ok(Tick::Continue) => {}
                Ok(Tick::Stop) => break,
                Err(e) => {
                    warn!(
                        action_set = %self.name,
                        phase = %self.phase.name(),
                        error = %e,
                        "Progress update abandoned for this tick"
                    );
                }
            }
        }
        debug!(action_set = %self.name, phase = %self.phase.name(), "Progress tracker stopped");
    }

    async fn tick(&self, cancel: &CancellationToken) -> crate::Result<Tick> {
        let Some(set) = self.store.get_action_set(&self.namespace, &self.name).await? else {
            return Ok(Tick::Stop);
        };
        let Some(status) = &set.status else {
            return Ok(Tick::Continue);
        };
        let Some(stored) = status.phase(self.index) else {
            return Ok(Tick::Stop);
        };
        if stored.state.is_terminal() {
            return Ok(Tick::Stop);
        }
        let Some(snapshot) = self.phase.progress() else {
            return Ok(Tick::Continue);
        };
        if snapshot_matches(stored, &snapshot) {
            return Ok(Tick::Continue);
        }

        debug!(
            action_set = %self.name,
            phase = %self.phase.name(),
            percent = snapshot.percentage,
            "Recording phase progress"
        );
        let index = self.index;
        let weights = self.weights.clone();
        reconcile::action_set(
            self.store.as_ref(),
            cancel,
            &self.namespace,
            &self.name,
            move |set| {
                let now = Utc::now();
                if let Some(status) = set.status.as_mut() {
                    if let Some(phase) = status.phase_mut(index) {
                        apply_snapshot(phase, &snapshot, now);
                    }
                    refresh_action_progress(status, weights.as_ref(), now);
                }
                Ok(())
            },
        )
        .await?;
        Ok(Tick::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use skiff_crd::{ActionStatus, PhaseProgress};

    fn t(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).unwrap()
    }

    fn phase(name: &str, state: State, percent: &str) -> Phase {
        Phase {
            name: name.to_string(),
            state,
            progress: PhaseProgress {
                progress_percent: percent.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn status(actions: Vec<Vec<Phase>>) -> ActionSetStatus {
        ActionSetStatus {
            state: State::Running,
            actions: actions
                .into_iter()
                .map(|phases| ActionStatus {
                    name: "backup".to_string(),
                    phases,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    struct Table(HashMap<String, f64>);

    impl PhaseWeights for Table {
        fn weight(&self, _action: usize, phase: &str) -> f64 {
            self.0.get(phase).copied().unwrap_or(1.0)
        }
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(100.0), "100");
        assert_eq!(format_percent(50.0), "50");
        assert_eq!(format_percent(100.0 / 3.0), "33.33");
        assert_eq!(format_percent(12.5), "12.50");
        assert_eq!(format_percent(99.999), "100");
    }

    #[test]
    fn test_aggregate_skips_unreported_phases() {
        let s = status(vec![
            vec![phase("a", State::Complete, "100"), phase("b", State::Running, "50")],
            vec![phase("c", State::Running, ""), phase("d", State::Pending, "")],
        ]);
        let agg = aggregate(&s, &UniformWeights);
        assert_eq!(agg.percent, Some(75.0));
    }

    #[test]
    fn test_aggregate_none_without_reports() {
        let s = status(vec![vec![phase("a", State::Running, "")]]);
        assert_eq!(aggregate(&s, &UniformWeights).percent, None);
    }

    #[test]
    fn test_aggregate_weighted() {
        let s = status(vec![vec![
            phase("copy", State::Complete, "100"),
            phase("snap", State::Running, "0"),
        ]]);
        let mut table = HashMap::new();
        table.insert("snap".to_string(), 2.0);
        let agg = aggregate(&s, &Table(table));
        assert_eq!(format_percent(agg.percent.unwrap()), "33.33");
    }

    #[test]
    fn test_aggregate_sums_bytes() {
        let mut a = phase("a", State::Complete, "100");
        a.progress.uploaded_bytes = 10;
        a.progress.estimated_upload_bytes = 10;
        let mut b = phase("b", State::Running, "20");
        b.progress.uploaded_bytes = 5;
        b.progress.downloaded_bytes = 7;
        let s = status(vec![vec![a], vec![b]]);

        let agg = aggregate(&s, &UniformWeights);
        assert_eq!(agg.uploaded_bytes, 15);
        assert_eq!(agg.downloaded_bytes, 7);
        assert_eq!(agg.estimated_upload_bytes, 10);
    }

    #[test]
    fn test_refresh_moves_timestamp_only_on_change() {
        let mut s = status(vec![vec![phase("a", State::Running, "40")]]);
        assert!(refresh_action_progress(&mut s, &UniformWeights, t(1)));
        assert_eq!(s.progress.percent_completed, "40");
        assert_eq!(s.progress.last_transition_time, Some(t(1)));

        assert!(!refresh_action_progress(&mut s, &UniformWeights, t(2)));
        assert_eq!(s.progress.last_transition_time, Some(t(1)));
    }

    #[test]
    fn test_apply_snapshot_is_monotonic() {
        let mut p = phase("copy", State::Running, "");
        assert!(apply_snapshot(&mut p, &Progress::new(60, ""), t(1)));
        assert_eq!(p.progress.progress_percent, "60");

        let lower = Progress::new(30, "").with_upload(300, 0);
        assert!(apply_snapshot(&mut p, &lower, t(2)));
        assert_eq!(p.progress.progress_percent, "60");
        assert_eq!(p.progress.uploaded_bytes, 300);
        assert_eq!(p.progress.last_transition_time, Some(t(2)));

        assert!(!apply_snapshot(&mut p, &lower, t(3)));
    }

    #[test]
    fn test_apply_snapshot_ignores_non_running() {
        let mut p = phase("copy", State::Complete, "100");
        assert!(!apply_snapshot(&mut p, &Progress::new(10, ""), t(1)));
        assert_eq!(p.progress.progress_percent, "100");
    }

    #[test]
    fn test_snapshot_matches() {
        let p = phase("copy", State::Running, "60");
        assert!(snapshot_matches(&p, &Progress::new(60, "")));
        assert!(snapshot_matches(&p, &Progress::new(40, "")));
        assert!(!snapshot_matches(&p, &Progress::new(61, "")));
        assert!(!snapshot_matches(&phase("copy", State::Running, ""), &Progress::new(0, "")));
    }

    #[test]
    fn test_mark_complete() {
        let mut s = status(vec![]);
        s.progress.running_phase = Some("a".to_string());
        mark_complete(&mut s, t(5));
        assert_eq!(s.progress.percent_completed, "100");
        assert_eq!(s.progress.last_transition_time, Some(t(5)));
        assert!(s.progress.running_phase.is_none());
    }

    #[test]
    fn test_mark_complete_restamps_full_progress() {
        let mut s = status(vec![]);
        s.progress.percent_completed = "100".to_string();
        s.progress.last_transition_time = Some(t(2));
        mark_complete(&mut s, t(9));
        assert_eq!(s.progress.last_transition_time, Some(t(9)));
    }
}
