//! Printed summary of a rebuilt normalized store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::{DimensionKind, NormalizedModel};
use crate::error::Result;
use crate::pipeline::storage::NormalizedStore;

const UNKNOWN: &str = "(unknown)";

/// One value of a distribution with its share of the total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub value: String,
    pub count: usize,
    pub percentage: f64,
}

/// An animal admitted more than once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatIntake {
    pub entity_id: String,
    pub name: Option<String>,
    pub intake_count: usize,
    pub first_intake: NaiveDateTime,
    pub last_intake: NaiveDateTime,
    /// Whole days between the first and last intake.
    pub span_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    pub table_counts: Vec<(String, usize)>,
    pub animal_types: Vec<Share>,
    pub top_breeds: Vec<Share>,
    pub intake_types: Vec<Share>,
    pub intake_conditions: Vec<Share>,
    pub outcome_types: Vec<Share>,
    pub matched_outcomes: usize,
    pub unmatched_outcomes: usize,
    pub mean_days_in_care: Option<f64>,
    pub median_days_in_care: Option<f64>,
    /// Mean days in care per animal type, by type name.
    pub mean_days_by_type: Vec<(String, f64)>,
    pub repeat_intakes: Vec<RepeatIntake>,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Count values, largest first, ties by value.
fn distribution<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<Share> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for value in values {
        *counts.entry(value.unwrap_or(UNKNOWN)).or_default() += 1;
        total += 1;
    }

    let mut shares: Vec<Share> = counts
        .into_iter()
        .map(|(value, count)| Share {
            value: value.to_string(),
            count,
            percentage: round2(count as f64 * 100.0 / total as f64),
        })
        .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    shares
}

fn lookup(model: &NormalizedModel, kind: DimensionKind) -> HashMap<i64, &str> {
    model
        .dimension(kind)
        .iter()
        .map(|r| (r.key, r.value.as_str()))
        .collect()
}

fn median(sorted: &[f64]) -> Option<f64> {
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[n / 2]),
        n => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Mean days in care grouped by the animal type of each outcome's entity.
/// Outcomes without a duration or a known type are left out.
fn mean_days_by_type(model: &NormalizedModel, types: &HashMap<i64, &str>) -> Vec<(String, f64)> {
    let type_of: HashMap<&str, &str> = model
        .entities
        .iter()
        .filter_map(|e| {
            let name = types.get(&e.animal_type_id?)?;
            Some((e.entity_id.as_str(), *name))
        })
        .collect();

    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for episode in &model.outcome_episodes {
        let (Some(days), Some(animal_type)) =
            (episode.days_in_care, type_of.get(episode.entity_id.as_str()))
        else {
            continue;
        };
        let entry = sums.entry(*animal_type).or_default();
        entry.0 += days;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(animal_type, (sum, n))| (animal_type.to_string(), round2(sum / n as f64)))
        .collect()
}

/// Animals with more than one intake episode, most intakes first.
fn repeat_intakes(model: &NormalizedModel, limit: usize) -> Vec<RepeatIntake> {
    let mut spans: BTreeMap<&str, (usize, NaiveDateTime, NaiveDateTime)> = BTreeMap::new();
    for episode in &model.intake_episodes {
        let ts = episode.intake_timestamp;
        spans
            .entry(episode.entity_id.as_str())
            .and_modify(|(count, first, last)| {
                *count += 1;
                *first = (*first).min(ts);
                *last = (*last).max(ts);
            })
            .or_insert((1, ts, ts));
    }

    let names: HashMap<&str, Option<&String>> = model
        .entities
        .iter()
        .map(|e| (e.entity_id.as_str(), e.name.as_ref()))
        .collect();

    let mut repeats: Vec<RepeatIntake> = spans
        .into_iter()
        .filter(|(_, (count, _, _))| *count > 1)
        .map(|(entity_id, (intake_count, first, last))| RepeatIntake {
            entity_id: entity_id.to_string(),
            name: names.get(entity_id).copied().flatten().cloned(),
            intake_count,
            first_intake: first,
            last_intake: last,
            span_days: (last - first).num_days(),
        })
        .collect();
    repeats.sort_by(|a, b| {
        b.intake_count
            .cmp(&a.intake_count)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    repeats.truncate(limit);
    repeats
}

impl StoreSummary {
    pub async fn collect(store: &dyn NormalizedStore, top: usize) -> Result<Self> {
        let model = store.snapshot().await?;
        Ok(Self::from_model(&model, top))
    }

    /// Summarize a model. `top` caps the breed list and the repeat intake list.
    pub fn from_model(model: &NormalizedModel, top: usize) -> Self {
        let types = lookup(model, DimensionKind::AnimalType);
        let breeds = lookup(model, DimensionKind::Breed);

        let animal_types = distribution(
            model
                .entities
                .iter()
                .map(|e| e.animal_type_id.and_then(|k| types.get(&k).copied())),
        );
        let mut breed_shares = distribution(
            model
                .entities
                .iter()
                .map(|e| e.breed_id.and_then(|k| breeds.get(&k).copied())),
        );
        breed_shares.truncate(top);

        let intake_types = distribution(
            model
                .intake_episodes
                .iter()
                .map(|e| e.intake_type.as_deref()),
        );
        let intake_conditions = distribution(
            model
                .intake_episodes
                .iter()
                .map(|e| e.condition.as_deref()),
        );

        let outcome_types = distribution(
            model
                .outcome_episodes
                .iter()
                .map(|e| e.outcome_type.as_deref()),
        );

        let mut days: Vec<f64> = model
            .outcome_episodes
            .iter()
            .filter_map(|e| e.days_in_care)
            .collect();
        days.sort_by(|a, b| a.total_cmp(b));
        let mean = (!days.is_empty()).then(|| days.iter().sum::<f64>() / days.len() as f64);
        let matched = model
            .outcome_episodes
            .iter()
            .filter(|e| e.matched_intake_id.is_some())
            .count();

        Self {
            table_counts: vec![
                ("animal_types".to_string(), model.animal_types.len()),
                ("breeds".to_string(), model.breeds.len()),
                ("colors".to_string(), model.colors.len()),
                ("animals".to_string(), model.entities.len()),
                ("intake".to_string(), model.intake_episodes.len()),
                ("outcome".to_string(), model.outcome_episodes.len()),
            ],
            animal_types,
            top_breeds: breed_shares,
            intake_types,
            intake_conditions,
            outcome_types,
            matched_outcomes: matched,
            unmatched_outcomes: model.outcome_episodes.len() - matched,
            mean_days_in_care: mean.map(round2),
            median_days_in_care: median(&days).map(round2),
            mean_days_by_type: mean_days_by_type(model, &types),
            repeat_intakes: repeat_intakes(model, top),
        }
    }
}

fn write_shares(f: &mut fmt::Formatter<'_>, title: &str, shares: &[Share]) -> fmt::Result {
    writeln!(f, "\n{}:", title)?;
    if shares.is_empty() {
        return writeln!(f, "   (none)");
    }
    for share in shares {
        writeln!(f, "   {}: {} ({}%)", share.value, share.count, share.percentage)?;
    }
    Ok(())
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Normalized tables:")?;
        for (table, count) in &self.table_counts {
            writeln!(f, "   ├─ {}: {} rows", table, count)?;
        }
        write_shares(f, "Animal types", &self.animal_types)?;
        write_shares(f, "Top breeds", &self.top_breeds)?;
        write_shares(f, "Intake types", &self.intake_types)?;
        write_shares(f, "Intake conditions", &self.intake_conditions)?;
        write_shares(f, "Outcome types", &self.outcome_types)?;

        writeln!(f, "\nOutcome matching:")?;
        writeln!(f, "   matched: {}", self.matched_outcomes)?;
        writeln!(f, "   unmatched: {}", self.unmatched_outcomes)?;
        match (self.mean_days_in_care, self.median_days_in_care) {
            (Some(mean), Some(median)) => {
                writeln!(f, "   days in care: mean {:.2}, median {:.2}", mean, median)?
            }
            _ => writeln!(f, "   days in care: n/a")?,
        }
        for (animal_type, mean) in &self.mean_days_by_type {
            writeln!(f, "   {}: {:.2} days", animal_type, mean)?;
        }

        writeln!(f, "\nAnimals with repeat intakes:")?;
        if self.repeat_intakes.is_empty() {
            return writeln!(f, "   (none)");
        }
        for r in &self.repeat_intakes {
            writeln!(
                f,
                "   {} {}: {} intakes, {} to {} ({} days)",
                r.entity_id,
                r.name.as_deref().unwrap_or(UNKNOWN),
                r.intake_count,
                r.first_intake.format("%d.%m.%Y %H:%M"),
                r.last_intake.format("%d.%m.%Y %H:%M"),
                r.span_days
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DimensionRow, Entity, IntakeEpisode, OutcomeEpisode};
    use chrono::{Duration, NaiveDate};

    fn at(hours: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(hours)
    }

    fn entity(id: &str, type_id: Option<i64>) -> Entity {
        Entity {
            entity_id: id.to_string(),
            name: None,
            animal_type_id: type_id,
            breed_id: None,
            color_id: None,
        }
    }

    fn dimension_row(key: i64, value: &str) -> DimensionRow {
        DimensionRow {
            key,
            value: value.to_string(),
        }
    }

    fn intake(
        id: i64,
        entity_id: &str,
        hours: i64,
        kind: &str,
        condition: Option<&str>,
    ) -> IntakeEpisode {
        IntakeEpisode {
            episode_id: id,
            entity_id: entity_id.to_string(),
            intake_timestamp: at(hours),
            intake_type: Some(kind.to_string()),
            condition: condition.map(str::to_string),
            location: None,
        }
    }

    fn outcome(id: i64, entity_id: &str, days: Option<f64>) -> OutcomeEpisode {
        OutcomeEpisode {
            episode_id: id,
            entity_id: entity_id.to_string(),
            outcome_timestamp: at(0),
            outcome_type: Some("Adoption".to_string()),
            outcome_subtype: None,
            matched_intake_id: days.map(|_| id),
            matched_intake_timestamp: None,
            days_in_care: days,
        }
    }

    fn model() -> NormalizedModel {
        NormalizedModel {
            animal_types: vec![dimension_row(1, "Cat"), dimension_row(2, "Dog")],
            entities: vec![
                Entity {
                    name: Some("Buddy".to_string()),
                    ..entity("A1", Some(2))
                },
                entity("A2", Some(2)),
                entity("A3", Some(1)),
                entity("A4", None),
            ],
            intake_episodes: vec![
                intake(1, "A1", 0, "Stray", Some("Normal")),
                intake(2, "A3", 24, "Stray", Some("Injured")),
                intake(3, "A1", 72, "Owner Surrender", Some("Normal")),
                intake(4, "A2", 80, "Stray", Some("Normal")),
                intake(5, "A3", 60, "Stray", None),
                intake(6, "A1", 240, "Stray", Some("Sick")),
            ],
            outcome_episodes: vec![
                outcome(1, "A1", Some(2.0)),
                outcome(2, "A3", Some(5.0)),
                outcome(3, "A2", None),
                outcome(4, "A1", Some(4.0)),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_type_distribution_over_entities() {
        let summary = StoreSummary::from_model(&model(), 5);
        assert_eq!(summary.animal_types[0].value, "Dog");
        assert_eq!(summary.animal_types[0].count, 2);
        assert_eq!(summary.animal_types[0].percentage, 50.0);
        assert_eq!(summary.animal_types.len(), 3);
        assert!(summary.animal_types.iter().any(|s| s.value == UNKNOWN));
    }

    #[test]
    fn test_days_in_care_ignores_nulls() {
        let summary = StoreSummary::from_model(&model(), 5);
        assert_eq!(summary.matched_outcomes, 3);
        assert_eq!(summary.unmatched_outcomes, 1);
        assert_eq!(summary.mean_days_in_care, Some(3.67));
        assert_eq!(summary.median_days_in_care, Some(4.0));
    }

    #[test]
    fn test_mean_days_grouped_by_animal_type() {
        let summary = StoreSummary::from_model(&model(), 5);
        assert_eq!(
            summary.mean_days_by_type,
            vec![("Cat".to_string(), 5.0), ("Dog".to_string(), 3.0)]
        );
    }

    #[test]
    fn test_repeat_intakes_ranked_by_count() {
        let summary = StoreSummary::from_model(&model(), 5);
        let repeats = &summary.repeat_intakes;
        assert_eq!(repeats.len(), 2);

        assert_eq!(repeats[0].entity_id, "A1");
        assert_eq!(repeats[0].name.as_deref(), Some("Buddy"));
        assert_eq!(repeats[0].intake_count, 3);
        assert_eq!(repeats[0].first_intake, at(0));
        assert_eq!(repeats[0].last_intake, at(240));
        assert_eq!(repeats[0].span_days, 10);

        // 36 hours apart, recorded out of order.
        assert_eq!(repeats[1].entity_id, "A3");
        assert_eq!(repeats[1].first_intake, at(24));
        assert_eq!(repeats[1].span_days, 1);

        let capped = StoreSummary::from_model(&model(), 1);
        assert_eq!(capped.repeat_intakes.len(), 1);
    }

    #[test]
    fn test_intake_distributions_over_episodes() {
        let summary = StoreSummary::from_model(&model(), 5);
        assert_eq!(summary.intake_types[0].value, "Stray");
        assert_eq!(summary.intake_types[0].count, 5);
        assert_eq!(summary.intake_types[0].percentage, 83.33);
        assert_eq!(summary.intake_types[1].value, "Owner Surrender");

        let conditions = &summary.intake_conditions;
        assert_eq!(conditions[0].value, "Normal");
        assert_eq!(conditions[0].count, 3);
        assert_eq!(conditions[0].percentage, 50.0);
        assert!(conditions.iter().any(|s| s.value == UNKNOWN && s.count == 1));
    }

    #[test]
    fn test_empty_model_renders() {
        let summary = StoreSummary::from_model(&NormalizedModel::default(), 5);
        let text = summary.to_string();
        assert!(text.contains("animals: 0 rows"));
        assert!(text.contains("days in care: n/a"));
        assert!(text.contains("Animals with repeat intakes:\n   (none)"));
    }
}
