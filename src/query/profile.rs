use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Accumulated time and call count of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTotals {
    /// Total nanoseconds.
    pub nanos: u64,
    /// Number of timed calls.
    pub calls: u64,
}

/// Snapshot of per-phase compilation and execution counters.
///
/// Counting is enabled by setting the `HIVEQ_PROFILE` environment variable
/// before the first query is compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Binding operator trees.
    pub bind: PhaseTotals,
    /// Rewrite pipeline runs.
    pub rewrite: PhaseTotals,
    /// Hive text formatting.
    pub format: PhaseTotals,
    /// Command submission.
    pub execute: PhaseTotals,
    /// Row conversion; one call per row.
    pub materialize: PhaseTotals,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum QueryProfileKind {
    Bind,
    Rewrite,
    Format,
    Execute,
    Materialize,
}

const PHASES: usize = 5;

#[derive(Default)]
struct PhaseCounter {
    nanos: AtomicU64,
    calls: AtomicU64,
}

impl PhaseCounter {
    fn read(&self, reset: bool) -> PhaseTotals {
        let take = |counter: &AtomicU64| {
            if reset {
                counter.swap(0, Ordering::Relaxed)
            } else {
                counter.load(Ordering::Relaxed)
            }
        };
        PhaseTotals {
            nanos: take(&self.nanos),
            calls: take(&self.calls),
        }
    }
}

static ENABLED: OnceLock<bool> = OnceLock::new();
static PHASE_COUNTERS: OnceLock<[PhaseCounter; PHASES]> = OnceLock::new();

fn enabled() -> bool {
    *ENABLED.get_or_init(|| std::env::var_os("HIVEQ_PROFILE").is_some())
}

fn phase_counters() -> Option<&'static [PhaseCounter; PHASES]> {
    enabled().then(|| PHASE_COUNTERS.get_or_init(Default::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    enabled().then(Instant::now)
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let (Some(start), Some(counters)) = (start, phase_counters()) else {
        return;
    };
    let counter = &counters[kind as usize];
    let nanos = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
    counter.nanos.fetch_add(nanos, Ordering::Relaxed);
    counter.calls.fetch_add(1, Ordering::Relaxed);
}

/// Reads the profiling counters, optionally resetting them.
///
/// Returns `None` when `HIVEQ_PROFILE` was not set.
///
/// ```no_run
/// use hiveq::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("rewrite: {}ns over {} runs", snapshot.rewrite.nanos, snapshot.rewrite.calls);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = phase_counters()?;
    let phase = |kind: QueryProfileKind| counters[kind as usize].read(reset);
    Some(QueryProfileSnapshot {
        bind: phase(QueryProfileKind::Bind),
        rewrite: phase(QueryProfileKind::Rewrite),
        format: phase(QueryProfileKind::Format),
        execute: phase(QueryProfileKind::Execute),
        materialize: phase(QueryProfileKind::Materialize),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_timer_records_nothing() {
        if enabled() {
            return;
        }
        assert!(profile_timer().is_none());
        record_profile_timer(QueryProfileKind::Format, None);
        assert!(profile_snapshot(false).is_none());
    }

    #[test]
    fn phases_index_distinct_counters() {
        let kinds = [
            QueryProfileKind::Bind,
            QueryProfileKind::Rewrite,
            QueryProfileKind::Format,
            QueryProfileKind::Execute,
            QueryProfileKind::Materialize,
        ];
        let slots: Vec<usize> = kinds.iter().map(|kind| *kind as usize).collect();
        assert_eq!(slots, (0..PHASES).collect::<Vec<_>>());
    }
}
