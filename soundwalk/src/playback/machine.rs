//! Proximity-triggered playback decisions.
//!
//! The state machine owns one [`RangeState`] per record and turns a location
//! fix into a [`TickPlan`]: which records entered or left their geofence,
//! which to start, and which to stop. It never touches audio itself; the
//! tracking session applies the plan to the player pool and feeds start
//! outcomes back through [`PlaybackStateMachine::record_outcome`].

use std::collections::{HashMap, HashSet};

use tokio::time::Instant;

use super::pool::StartOutcome;
use super::state::{RangeState, RangeTransition, RecordPhase, ReentryPolicy};
use crate::error::PlaybackError;
use crate::geo::{find_nearby, is_in_range, within_annulus, Location};
use crate::model::{AudioRecord, RecordId, WorkDataset};

/// Default pre-filter radius around the listener, in meters.
pub const DEFAULT_PREFILTER_RADIUS_M: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineConfig {
    /// Markers farther than this are skipped before per-record checks.
    ///
    /// Widened per tick to the largest outer radius in the dataset, so the
    /// pre-filter can never hide a geofence.
    pub prefilter_radius_m: f64,
    pub policy: ReentryPolicy,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            prefilter_radius_m: DEFAULT_PREFILTER_RADIUS_M,
            policy: ReentryPolicy::default(),
        }
    }
}

/// Decisions produced by one proximity check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickPlan {
    /// Geofence edges crossed during this tick.
    pub transitions: Vec<(RecordId, RangeTransition)>,
    /// Records to start, nearest marker first.
    pub starts: Vec<AudioRecord>,
    /// Active records to stop, sorted by id.
    pub stops: Vec<RecordId>,
    /// Number of markers that passed the pre-filter.
    pub candidates: usize,
}

impl TickPlan {
    /// Whether the tick requires no action.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.starts.is_empty() && self.stops.is_empty()
    }
}

/// Per-record geofence bookkeeping and start/stop decisions.
#[derive(Debug, Default)]
pub struct PlaybackStateMachine {
    config: MachineConfig,
    ranges: HashMap<RecordId, RangeState>,
    /// Records that have played this session (used by `ReentryPolicy::Once`).
    played_once: HashSet<RecordId>,
    /// Records whose payload cannot be decoded; never retried this session.
    unplayable: HashSet<RecordId>,
}

impl PlaybackStateMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn policy(&self) -> ReentryPolicy {
        self.config.policy
    }

    /// Evaluate a location fix.
    ///
    /// `active` holds the records the pool is loading or playing; they are
    /// never started again and are stopped once out of range.
    pub fn evaluate(
        &mut self,
        location: &Location,
        dataset: &WorkDataset,
        active: &HashSet<RecordId>,
        now: Instant,
    ) -> TickPlan {
        let mut plan = TickPlan::default();

        let widest = dataset
            .markers
            .iter()
            .flat_map(|m| m.records.iter())
            .map(|r| r.outer_radius)
            .fold(0.0_f64, f64::max);
        let radius = self.config.prefilter_radius_m.max(widest);

        let nearby = find_nearby(location, &dataset.markers, radius);
        plan.candidates = nearby.len();

        let mut seen: HashSet<&str> = HashSet::new();
        for near in &nearby {
            for record in &near.marker.records {
                if !seen.insert(record.record_id.as_str()) {
                    continue;
                }
                let in_range = within_annulus(record, near.distance);
                self.update(&record.record_id, in_range, now, &mut plan);
                if in_range && self.should_start(record, active) {
                    plan.starts.push(record.clone());
                }
            }
        }

        // Anything tracked as in range or active but outside the candidate
        // list is re-checked against its own marker.
        let mut recheck: Vec<RecordId> = self
            .ranges
            .iter()
            .filter(|(_, state)| state.in_range)
            .map(|(id, _)| id.clone())
            .chain(active.iter().cloned())
            .filter(|id| !seen.contains(id.as_str()))
            .collect();
        recheck.sort();
        recheck.dedup();

        for id in recheck {
            match dataset.find_record(&id) {
                Some((marker, record)) => {
                    let in_range = is_in_range(record, location, marker);
                    self.update(&id, in_range, now, &mut plan);
                    if in_range && self.should_start(record, active) {
                        plan.starts.push(record.clone());
                    }
                }
                None => {
                    tracing::debug!(record_id = %id, "Record no longer in dataset");
                    self.update(&id, false, now, &mut plan);
                }
            }
        }

        let mut stops: Vec<RecordId> = active
            .iter()
            .filter(|id| !self.ranges.get(*id).is_some_and(|s| s.in_range))
            .cloned()
            .collect();
        stops.sort();
        plan.stops = stops;

        if !plan.is_empty() {
            tracing::debug!(
                candidates = plan.candidates,
                transitions = plan.transitions.len(),
                starts = plan.starts.len(),
                stops = plan.stops.len(),
                "Proximity check"
            );
        }
        plan
    }

    fn update(&mut self, id: &str, in_range: bool, now: Instant, plan: &mut TickPlan) {
        let state = self
            .ranges
            .entry(id.to_string())
            .or_insert_with(|| RangeState::new(now));
        state.last_check = now;

        if state.in_range == in_range {
            return;
        }
        state.in_range = in_range;
        if !in_range {
            state.has_played_in_range = false;
        }

        let transition = if in_range {
            RangeTransition::Entered
        } else {
            RangeTransition::Exited
        };
        tracing::debug!(record_id = %id, ?transition, "Geofence transition");
        plan.transitions.push((id.to_string(), transition));
    }

    fn should_start(&self, record: &AudioRecord, active: &HashSet<RecordId>) -> bool {
        let id = &record.record_id;
        let played = self
            .ranges
            .get(id)
            .is_some_and(|s| s.has_played_in_range);
        let blocked_by_policy =
            self.config.policy == ReentryPolicy::Once && self.played_once.contains(id);

        record.playable
            && !played
            && !blocked_by_policy
            && !self.unplayable.contains(id)
            && !active.contains(id)
    }

    /// Feed back the outcome of a start attempt.
    ///
    /// Returns `true` when the record started but has since left its
    /// geofence, meaning the caller should stop it.
    pub fn record_outcome(
        &mut self,
        record_id: &str,
        outcome: &Result<StartOutcome, PlaybackError>,
    ) -> bool {
        match outcome {
            Ok(StartOutcome::Started) | Ok(StartOutcome::AlreadyPlaying) => {
                match self.ranges.get_mut(record_id) {
                    Some(state) if state.in_range => {
                        state.has_played_in_range = true;
                        self.played_once.insert(record_id.to_string());
                        false
                    }
                    _ => true,
                }
            }
            Ok(StartOutcome::Superseded) => false,
            Err(error) => {
                if !error.is_retryable() {
                    tracing::warn!(
                        record_id,
                        error = %error,
                        "Record marked unplayable for this session"
                    );
                    self.unplayable.insert(record_id.to_string());
                }
                false
            }
        }
    }

    /// Lifecycle phase of a record; unknown records are out of range.
    pub fn phase(&self, record_id: &str) -> RecordPhase {
        self.ranges
            .get(record_id)
            .map(RangeState::phase)
            .unwrap_or(RecordPhase::OutOfRange)
    }

    pub fn range_state(&self, record_id: &str) -> Option<RangeState> {
        self.ranges.get(record_id).copied()
    }

    pub fn is_unplayable(&self, record_id: &str) -> bool {
        self.unplayable.contains(record_id)
    }

    /// Records currently inside their geofence, sorted.
    pub fn in_range_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<_> = self
            .ranges
            .iter()
            .filter(|(_, s)| s.in_range)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Forget all per-session state.
    pub fn reset(&mut self) {
        self.ranges.clear();
        self.played_once.clear();
        self.unplayable.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_meters;
    use crate::model::{MarkerPoint, WorkInfo};

    const LAT: f64 = 35.0;
    const LON: f64 = 139.0;

    fn at(north_m: f64) -> Location {
        let (lat, lon) = offset_meters(LAT, LON, north_m, 0.0);
        Location::new(lat, lon)
    }

    fn single(record: AudioRecord) -> WorkDataset {
        WorkDataset::new(
            "s",
            WorkInfo::default(),
            vec![MarkerPoint::new(LAT, LON).with_record(record)],
        )
    }

    fn ids(records: &[AudioRecord]) -> Vec<&str> {
        records.iter().map(|r| r.record_id.as_str()).collect()
    }

    fn active(ids: &[&str]) -> HashSet<RecordId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn walk(policy: ReentryPolicy) -> Vec<TickPlan> {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::new(MachineConfig {
            policy,
            ..Default::default()
        });
        let now = Instant::now();
        let mut plans = Vec::new();

        let p = machine.evaluate(&at(40.0), &dataset, &active(&[]), now);
        assert!(!machine.record_outcome("r", &Ok(StartOutcome::Started)));
        plans.push(p);

        plans.push(machine.evaluate(&at(40.0), &dataset, &active(&["r"]), now));
        plans.push(machine.evaluate(&at(60.0), &dataset, &active(&["r"]), now));
        plans.push(machine.evaluate(&at(30.0), &dataset, &active(&[]), now));
        plans
    }

    #[test]
    fn test_reentry_replays_under_repeat() {
        let plans = walk(ReentryPolicy::Repeat);

        assert_eq!(ids(&plans[0].starts), vec!["r"]);
        assert_eq!(
            plans[0].transitions,
            vec![("r".to_string(), RangeTransition::Entered)]
        );
        assert!(plans[1].is_empty());
        assert_eq!(plans[2].stops, vec!["r"]);
        assert_eq!(
            plans[2].transitions,
            vec![("r".to_string(), RangeTransition::Exited)]
        );
        assert_eq!(ids(&plans[3].starts), vec!["r"]);
    }

    #[test]
    fn test_reentry_is_silent_under_once() {
        let plans = walk(ReentryPolicy::Once);

        assert_eq!(ids(&plans[0].starts), vec!["r"]);
        assert_eq!(plans[2].stops, vec!["r"]);
        assert!(plans[3].starts.is_empty());
        assert_eq!(
            plans[3].transitions,
            vec![("r".to_string(), RangeTransition::Entered)]
        );
    }

    #[test]
    fn test_phases_follow_lifecycle() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::default();
        let now = Instant::now();

        assert_eq!(machine.phase("r"), RecordPhase::OutOfRange);
        machine.evaluate(&at(40.0), &dataset, &active(&[]), now);
        assert_eq!(machine.phase("r"), RecordPhase::InRangeUnplayed);
        machine.record_outcome("r", &Ok(StartOutcome::Started));
        assert_eq!(machine.phase("r"), RecordPhase::InRangePlayed);
        machine.evaluate(&at(60.0), &dataset, &active(&["r"]), now);
        assert_eq!(machine.phase("r"), RecordPhase::OutOfRange);
        assert!(!machine.range_state("r").unwrap().has_played_in_range);
    }

    #[test]
    fn test_inner_radius_keeps_center_silent() {
        let dataset = single(AudioRecord::new("ring", 20.0, 50.0));
        let mut machine = PlaybackStateMachine::default();
        let now = Instant::now();

        let plan = machine.evaluate(&at(5.0), &dataset, &active(&[]), now);
        assert!(plan.starts.is_empty());

        let plan = machine.evaluate(&at(25.0), &dataset, &active(&[]), now);
        assert_eq!(ids(&plan.starts), vec!["ring"]);
    }

    #[test]
    fn test_overlapping_markers_start_together() {
        let (lat2, lon2) = offset_meters(LAT, LON, 10.0, 0.0);
        let dataset = WorkDataset::new(
            "s",
            WorkInfo::default(),
            vec![
                MarkerPoint::new(LAT, LON).with_record(AudioRecord::new("a", 0.0, 50.0)),
                MarkerPoint::new(lat2, lon2).with_record(AudioRecord::new("b", 0.0, 50.0)),
            ],
        );
        let mut machine = PlaybackStateMachine::default();

        let plan = machine.evaluate(&at(5.0), &dataset, &active(&[]), Instant::now());

        let mut started = ids(&plan.starts);
        started.sort();
        assert_eq!(started, vec!["a", "b"]);
        assert_eq!(plan.candidates, 2);
    }

    #[test]
    fn test_failed_start_is_retried() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::default();
        let now = Instant::now();

        machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        machine.record_outcome("r", &Err(PlaybackError::Network("reset".into())));

        let plan = machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        assert_eq!(ids(&plan.starts), vec!["r"]);
    }

    #[test]
    fn test_decode_failure_marks_unplayable() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::default();
        let now = Instant::now();

        machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        machine.record_outcome("r", &Err(PlaybackError::Decode("bad frame".into())));

        assert!(machine.is_unplayable("r"));
        let plan = machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        assert!(plan.starts.is_empty());
    }

    #[test]
    fn test_started_after_exit_requests_stop() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::default();
        let now = Instant::now();

        machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        machine.evaluate(&at(80.0), &dataset, &active(&["r"]), now);

        assert!(machine.record_outcome("r", &Ok(StartOutcome::Started)));
        assert_eq!(machine.phase("r"), RecordPhase::OutOfRange);
    }

    #[test]
    fn test_active_record_missing_from_dataset_is_stopped() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::default();

        let plan = machine.evaluate(&at(10.0), &dataset, &active(&["gone"]), Instant::now());

        assert_eq!(plan.stops, vec!["gone"]);
        assert!(plan.starts.iter().all(|r| r.record_id != "gone"));
    }

    #[test]
    fn test_far_listener_rechecks_tracked_records() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::default();
        let now = Instant::now();

        machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        let plan = machine.evaluate(&at(5_000.0), &dataset, &active(&["r"]), now);

        assert_eq!(plan.candidates, 0);
        assert_eq!(plan.stops, vec!["r"]);
        assert_eq!(
            plan.transitions,
            vec![("r".to_string(), RangeTransition::Exited)]
        );
    }

    #[test]
    fn test_wide_geofence_survives_prefilter() {
        let dataset = single(AudioRecord::new("wide", 0.0, 300.0));
        let mut machine = PlaybackStateMachine::default();

        let plan = machine.evaluate(&at(250.0), &dataset, &active(&[]), Instant::now());

        assert_eq!(ids(&plan.starts), vec!["wide"]);
    }

    #[test]
    fn test_reset_forgets_everything() {
        let dataset = single(AudioRecord::new("r", 0.0, 50.0));
        let mut machine = PlaybackStateMachine::new(MachineConfig {
            policy: ReentryPolicy::Once,
            ..Default::default()
        });
        let now = Instant::now();

        machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        machine.record_outcome("r", &Ok(StartOutcome::Started));
        machine.reset();

        assert!(machine.range_state("r").is_none());
        let plan = machine.evaluate(&at(10.0), &dataset, &active(&[]), now);
        assert_eq!(ids(&plan.starts), vec!["r"]);
    }
}
