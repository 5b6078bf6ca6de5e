//! Episode correlation: pair each outcome with the intake it closes.
//!
//! Within one animal, intakes and outcomes are sorted independently by
//! `(timestamp, record order)` and the k-th outcome is paired with the k-th
//! intake. This models repeated intake/outcome cycles (returns and
//! re-admissions) without any nearest-timestamp search.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{IntakeEpisode, OutcomeEpisode, OutcomeEvent, RawBatch};

const MICROS_PER_DAY: f64 = 86_400_000_000.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Elapsed time from intake to outcome in fractional days.
///
/// Null when either timestamp is missing or the outcome precedes the intake.
pub fn days_between(
    intake: Option<NaiveDateTime>,
    outcome: Option<NaiveDateTime>,
) -> Option<f64> {
    let (intake, outcome) = (intake?, outcome?);
    if outcome < intake {
        return None;
    }
    let elapsed = outcome - intake;
    // Microsecond count overflows only for spans beyond ~292k years.
    Some(match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / MICROS_PER_DAY,
        None => elapsed.num_milliseconds() as f64 / MILLIS_PER_DAY,
    })
}

/// One intake episode per timestamped intake record, ids assigned 1..n in
/// record order. Returns the episodes and the number of records dropped for
/// lacking a timestamp.
pub fn build_intake_episodes(batch: &RawBatch) -> (Vec<IntakeEpisode>, usize) {
    let mut episodes = Vec::with_capacity(batch.intakes.len());
    let mut dropped = 0;

    for (order, event) in batch.intakes.iter().enumerate() {
        let Some(ts) = event.timestamp else {
            debug!(
                "Intake record {} for {} has no timestamp; no episode created",
                order, event.entity_id
            );
            dropped += 1;
            continue;
        };
        episodes.push(IntakeEpisode {
            episode_id: episodes.len() as i64 + 1,
            entity_id: event.entity_id.clone(),
            intake_timestamp: ts,
            intake_type: event.attrs.intake_type.clone(),
            condition: event.attrs.condition.clone(),
            location: event.attrs.location.clone(),
        });
    }

    if dropped > 0 {
        warn!("{} intake records without a timestamp were not loaded", dropped);
    }
    (episodes, dropped)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub matched: usize,
    pub unmatched: usize,
    pub dropped_outcomes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationOutput {
    pub episodes: Vec<OutcomeEpisode>,
    pub stats: CorrelationStats,
}

/// An outcome waiting for its pairing, remembering where its episode row
/// lives in the output.
struct PendingOutcome {
    slot: usize,
    ts: NaiveDateTime,
    order: usize,
}

/// Correlate outcome records against the intake episodes already written.
///
/// Outcome episode ids follow record order among timestamped outcomes, so
/// the output order does not depend on how entity groups are visited.
pub fn correlate(outcomes: &[OutcomeEvent], intakes: &[IntakeEpisode]) -> CorrelationOutput {
    let mut intake_groups: BTreeMap<&str, Vec<&IntakeEpisode>> = BTreeMap::new();
    for episode in intakes {
        intake_groups
            .entry(episode.entity_id.as_str())
            .or_default()
            .push(episode);
    }
    // Episode ids follow record order, so they break timestamp ties.
    for group in intake_groups.values_mut() {
        group.sort_by_key(|e| (e.intake_timestamp, e.episode_id));
    }

    let mut episodes = Vec::with_capacity(outcomes.len());
    let mut outcome_groups: BTreeMap<&str, Vec<PendingOutcome>> = BTreeMap::new();
    let mut stats = CorrelationStats::default();

    for (order, event) in outcomes.iter().enumerate() {
        let Some(ts) = event.timestamp else {
            debug!(
                "Outcome record {} for {} has no timestamp; no episode created",
                order, event.entity_id
            );
            stats.dropped_outcomes += 1;
            continue;
        };
        let slot = episodes.len();
        episodes.push(OutcomeEpisode {
            episode_id: slot as i64 + 1,
            entity_id: event.entity_id.clone(),
            outcome_timestamp: ts,
            outcome_type: event.attrs.outcome_type.clone(),
            outcome_subtype: event.attrs.outcome_subtype.clone(),
            matched_intake_id: None,
            matched_intake_timestamp: None,
            days_in_care: None,
        });
        outcome_groups
            .entry(event.entity_id.as_str())
            .or_default()
            .push(PendingOutcome { slot, ts, order });
    }

    for (entity_id, mut pending) in outcome_groups {
        pending.sort_by_key(|p| (p.ts, p.order));
        let ranked_intakes = intake_groups.get(entity_id).map(Vec::as_slice).unwrap_or(&[]);

        for (rank, outcome) in pending.iter().enumerate() {
            let episode = &mut episodes[outcome.slot];
            match ranked_intakes.get(rank) {
                Some(intake) if intake.intake_timestamp <= outcome.ts => {
                    episode.matched_intake_id = Some(intake.episode_id);
                    episode.matched_intake_timestamp = Some(intake.intake_timestamp);
                    episode.days_in_care =
                        days_between(Some(intake.intake_timestamp), Some(outcome.ts));
                    stats.matched += 1;
                }
                Some(intake) => {
                    debug!(
                        "Outcome at {} for {} precedes its ranked intake at {}; left unmatched",
                        outcome.ts, entity_id, intake.intake_timestamp
                    );
                    stats.unmatched += 1;
                }
                None => {
                    stats.unmatched += 1;
                }
            }
        }
    }

    if stats.dropped_outcomes > 0 {
        warn!(
            "{} outcome records without a timestamp were not loaded",
            stats.dropped_outcomes
        );
    }
    debug!(
        "Correlated {} outcomes: {} matched, {} unmatched",
        episodes.len(),
        stats.matched,
        stats.unmatched
    );

    CorrelationOutput { episodes, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntakeAttrs, IntakeEvent, OutcomeAttrs, RawEvent};
    use chrono::{Duration, NaiveDate};

    fn t(day: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
            + Duration::days(day)
    }

    fn intake(id: &str, day: Option<i64>) -> IntakeEvent {
        RawEvent {
            entity_id: id.to_string(),
            name: None,
            animal_type: None,
            breed: None,
            color: None,
            timestamp: day.map(t),
            attrs: IntakeAttrs {
                intake_type: Some("Stray".to_string()),
                condition: Some("Normal".to_string()),
                location: None,
            },
        }
    }

    fn outcome(id: &str, day: Option<i64>) -> OutcomeEvent {
        RawEvent {
            entity_id: id.to_string(),
            name: None,
            animal_type: None,
            breed: None,
            color: None,
            timestamp: day.map(t),
            attrs: OutcomeAttrs {
                outcome_type: Some("Adoption".to_string()),
                outcome_subtype: None,
            },
        }
    }

    fn run(intakes: Vec<IntakeEvent>, outcomes: Vec<OutcomeEvent>) -> CorrelationOutput {
        let batch = RawBatch::new(intakes, outcomes);
        let (intake_episodes, _) = build_intake_episodes(&batch);
        correlate(&batch.outcomes, &intake_episodes)
    }

    #[test]
    fn test_days_between() {
        assert_eq!(days_between(Some(t(1)), Some(t(3))), Some(2.0));
        assert_eq!(days_between(Some(t(3)), Some(t(3))), Some(0.0));
        assert_eq!(days_between(Some(t(3)), Some(t(1))), None);
        assert_eq!(days_between(None, Some(t(1))), None);
        assert_eq!(days_between(Some(t(1)), None), None);

        let half_day = t(1) + Duration::hours(12);
        assert_eq!(days_between(Some(t(1)), Some(half_day)), Some(0.5));
    }

    #[test]
    fn test_days_between_keeps_sub_millisecond_precision() {
        let later = t(1) + Duration::microseconds(1500);
        assert_eq!(
            days_between(Some(t(1)), Some(later)),
            Some(1500.0 / 86_400_000_000.0)
        );
    }

    #[test]
    fn test_rank_aligned_pairing_for_repeat_cycles() {
        // Records arrive out of chronological order.
        let out = run(
            vec![intake("A1", Some(5)), intake("A1", Some(1))],
            vec![outcome("A1", Some(10)), outcome("A1", Some(3))],
        );

        let by_ts: BTreeMap<NaiveDateTime, &OutcomeEpisode> =
            out.episodes.iter().map(|e| (e.outcome_timestamp, e)).collect();

        let first = by_ts[&t(3)];
        assert_eq!(first.matched_intake_timestamp, Some(t(1)));
        assert_eq!(first.days_in_care, Some(2.0));

        let second = by_ts[&t(10)];
        assert_eq!(second.matched_intake_timestamp, Some(t(5)));
        assert_eq!(second.days_in_care, Some(5.0));

        assert_eq!(out.stats.matched, 2);
        assert_eq!(out.stats.unmatched, 0);
    }

    #[test]
    fn test_outcome_without_intake_is_unmatched() {
        let out = run(vec![], vec![outcome("A2", Some(7))]);

        assert_eq!(out.episodes.len(), 1);
        assert_eq!(out.episodes[0].matched_intake_timestamp, None);
        assert_eq!(out.episodes[0].matched_intake_id, None);
        assert_eq!(out.episodes[0].days_in_care, None);
        assert_eq!(out.stats.unmatched, 1);
    }

    #[test]
    fn test_extra_outcomes_beyond_intakes_are_unmatched() {
        let out = run(
            vec![intake("A1", Some(1))],
            vec![outcome("A1", Some(2)), outcome("A1", Some(4))],
        );
        assert_eq!(out.stats.matched, 1);
        assert_eq!(out.stats.unmatched, 1);
        assert_eq!(out.episodes[1].days_in_care, None);
    }

    #[test]
    fn test_outcome_before_ranked_intake_is_unmatched() {
        let out = run(vec![intake("A1", Some(6))], vec![outcome("A1", Some(2))]);
        assert_eq!(out.episodes[0].matched_intake_id, None);
        assert_eq!(out.episodes[0].days_in_care, None);
        assert_eq!(out.stats.unmatched, 1);
    }

    #[test]
    fn test_missing_timestamps_are_dropped_not_errors() {
        let batch = RawBatch::new(
            vec![intake("A1", None), intake("A1", Some(1))],
            vec![outcome("A1", None), outcome("A1", Some(2))],
        );
        let (intakes, dropped) = build_intake_episodes(&batch);
        assert_eq!(dropped, 1);
        assert_eq!(intakes.len(), 1);
        assert_eq!(intakes[0].episode_id, 1);

        let out = correlate(&batch.outcomes, &intakes);
        assert_eq!(out.stats.dropped_outcomes, 1);
        assert_eq!(out.episodes.len(), 1);
        assert_eq!(out.episodes[0].days_in_care, Some(1.0));
    }

    #[test]
    fn test_timestamp_ties_break_by_record_order() {
        let out = run(
            vec![intake("A1", Some(1)), intake("A1", Some(1))],
            vec![outcome("A1", Some(2)), outcome("A1", Some(2))],
        );
        assert_eq!(out.episodes[0].matched_intake_id, Some(1));
        assert_eq!(out.episodes[1].matched_intake_id, Some(2));

        let again = run(
            vec![intake("A1", Some(1)), intake("A1", Some(1))],
            vec![outcome("A1", Some(2)), outcome("A1", Some(2))],
        );
        assert_eq!(out.episodes, again.episodes);
    }

    #[test]
    fn test_groups_do_not_interfere() {
        let out = run(
            vec![intake("A1", Some(1)), intake("B1", Some(2))],
            vec![outcome("B1", Some(4)), outcome("A1", Some(3))],
        );
        assert_eq!(out.episodes[0].entity_id, "B1");
        assert_eq!(out.episodes[0].days_in_care, Some(2.0));
        assert_eq!(out.episodes[1].entity_id, "A1");
        assert_eq!(out.episodes[1].days_in_care, Some(2.0));
    }
}
