//! Canonical tournament entity model, candidate filtering, and run accounting types.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "podium-core";

/// A tournament summary returned by a listing call, not yet fetched in full.
///
/// Every field except the external identifier is optional: the feed is
/// eventually consistent and summaries for tournaments still in setup can
/// arrive with holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub external_id: String,
    pub name: Option<String>,
    pub game_id: Option<String>,
    pub country_code: Option<String>,
    pub online: Option<bool>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Root of a normalized entity subtree. Not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentDraft {
    pub external_id: String,
    pub name: String,
    pub slug: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub country_code: Option<String>,
    pub online: Option<bool>,
    pub game_id: Option<String>,
}

/// One bracket/game of a tournament. A multi-game upstream record produces
/// one of these per constituent game, never a flattened single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub external_id: String,
    pub name: String,
    pub game_id: Option<String>,
    pub entrant_count: Option<i32>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDraft {
    pub external_id: String,
    pub name: String,
    pub ordinal: Option<i32>,
    pub bracket_type: Option<String>,
}

/// Leaf of the hierarchy. A negative score marks a DQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDraft {
    pub external_id: String,
    pub round: Option<i32>,
    pub entrant1_id: Option<String>,
    pub entrant2_id: Option<String>,
    pub entrant1_score: Option<i32>,
    pub entrant2_score: Option<i32>,
    pub winner_id: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNode {
    pub phase: PhaseDraft,
    pub sets: Vec<SetDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNode {
    pub event: EventDraft,
    pub phases: Vec<PhaseNode>,
}

/// One candidate's full entity subtree, the unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentTree {
    pub tournament: TournamentDraft,
    pub events: Vec<EventNode>,
}

impl TournamentTree {
    /// Total number of entities in the subtree, tournament included.
    pub fn entity_count(&self) -> usize {
        1 + self
            .events
            .iter()
            .map(|e| {
                1 + e
                    .phases
                    .iter()
                    .map(|p| 1 + p.sets.len())
                    .sum::<usize>()
            })
            .sum::<usize>()
    }
}

/// Upsert tallies for one entity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl ReconcileCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    pub fn merge(&mut self, other: &ReconcileCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Per-level upsert tallies for one reconciled subtree (or a whole run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub tournaments: ReconcileCounts,
    pub events: ReconcileCounts,
    pub phases: ReconcileCounts,
    pub sets: ReconcileCounts,
}

impl ReconcileOutcome {
    pub fn merge(&mut self, other: &ReconcileOutcome) {
        self.tournaments.merge(&other.tournaments);
        self.events.merge(&other.events);
        self.phases.merge(&other.phases);
        self.sets.merge(&other.sets);
    }

    pub fn inserted(&self) -> u64 {
        self.tournaments.inserted + self.events.inserted + self.phases.inserted + self.sets.inserted
    }

    pub fn updated(&self) -> u64 {
        self.tournaments.updated + self.events.updated + self.phases.updated + self.sets.updated
    }

    pub fn unchanged(&self) -> u64 {
        self.tournaments.unchanged
            + self.events.unchanged
            + self.phases.unchanged
            + self.sets.unchanged
    }
}

/// Resumable progress marker for one filter configuration.
///
/// `cursor` is the listing cursor that produced the page containing
/// `last_candidate`, so a resumed run can re-request that page and skip
/// forward. Only the run coordinator writes this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cursor: Option<String>,
    pub last_candidate: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Declarative candidate filter. All criteria are independently optional and
/// AND-combined; an absent criterion imposes no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub starts_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub name_pattern: Option<String>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.game.is_none()
            && self.starts_after.is_none()
            && self.ends_before.is_none()
            && self.country.is_none()
            && self.online.is_none()
            && self.name_pattern.is_none()
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid name pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Compiled form of [`FilterCriteria`]. Evaluation is pure and does no I/O,
/// so candidates can be rejected before spending a detail-fetch call.
#[derive(Debug)]
pub struct CandidateFilter {
    criteria: FilterCriteria,
    name_pattern: Option<Regex>,
}

impl CandidateFilter {
    /// Compile the criteria. The name pattern becomes a case-insensitive
    /// regex; an invalid pattern is a configuration error, not a
    /// per-candidate one.
    pub fn compile(criteria: FilterCriteria) -> Result<Self, FilterError> {
        let name_pattern = match &criteria.name_pattern {
            Some(pattern) => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| FilterError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            criteria,
            name_pattern,
        })
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// AND-combined match against every supplied criterion. A candidate
    /// missing a field required by an active criterion is rejected.
    pub fn accepts(&self, candidate: &CandidateSummary) -> bool {
        if let Some(game) = &self.criteria.game {
            match &candidate.game_id {
                Some(candidate_game) if candidate_game == game => {}
                _ => return false,
            }
        }

        if let Some(country) = &self.criteria.country {
            match &candidate.country_code {
                Some(candidate_country) if candidate_country == country => {}
                _ => return false,
            }
        }

        if let Some(online) = self.criteria.online {
            match candidate.online {
                Some(candidate_online) if candidate_online == online => {}
                _ => return false,
            }
        }

        if self.criteria.starts_after.is_some() || self.criteria.ends_before.is_some() {
            // The candidate's start date is "its date" for the window check.
            let Some(date) = candidate.start_at else {
                return false;
            };
            if let Some(lower) = self.criteria.starts_after {
                if date < lower {
                    return false;
                }
            }
            if let Some(upper) = self.criteria.ends_before {
                if date > upper {
                    return false;
                }
            }
        }

        if let Some(pattern) = &self.name_pattern {
            match &candidate.name {
                Some(name) if pattern.is_match(name) => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(name: &str, game: &str, country: &str, ymd: (i32, u32, u32)) -> CandidateSummary {
        CandidateSummary {
            external_id: format!("T-{name}"),
            name: Some(name.to_string()),
            game_id: Some(game.to_string()),
            country_code: Some(country.to_string()),
            online: Some(false),
            start_at: Utc.with_ymd_and_hms(ymd.0, ymd.1, ymd.2, 12, 0, 0).single(),
            end_at: None,
        }
    }

    #[test]
    fn empty_criteria_accept_everything() {
        let filter = CandidateFilter::compile(FilterCriteria::default()).expect("compile");
        assert!(filter.accepts(&candidate("Weekly #4", "melee", "US", (2024, 1, 15))));
        assert!(filter.accepts(&CandidateSummary {
            external_id: "T-bare".into(),
            name: None,
            game_id: None,
            country_code: None,
            online: None,
            start_at: None,
            end_at: None,
        }));
    }

    #[test]
    fn date_window_is_inclusive_and_bounds_both_sides() {
        let filter = CandidateFilter::compile(FilterCriteria {
            game: Some("melee".into()),
            country: Some("US".into()),
            starts_after: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            ends_before: Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).single(),
            ..FilterCriteria::default()
        })
        .expect("compile");

        assert!(filter.accepts(&candidate("Genesis Weekly", "melee", "US", (2024, 1, 15))));
        assert!(!filter.accepts(&candidate("February Major", "melee", "US", (2024, 2, 1))));
    }

    #[test]
    fn all_supplied_criteria_must_match() {
        let filter = CandidateFilter::compile(FilterCriteria {
            game: Some("melee".into()),
            country: Some("US".into()),
            ..FilterCriteria::default()
        })
        .expect("compile");

        assert!(filter.accepts(&candidate("Local", "melee", "US", (2024, 3, 2))));
        assert!(!filter.accepts(&candidate("Local", "ultimate", "US", (2024, 3, 2))));
        assert!(!filter.accepts(&candidate("Local", "melee", "CA", (2024, 3, 2))));
    }

    #[test]
    fn missing_field_fails_closed_when_criterion_is_active() {
        let filter = CandidateFilter::compile(FilterCriteria {
            country: Some("US".into()),
            ..FilterCriteria::default()
        })
        .expect("compile");

        let mut no_country = candidate("Anon Bracket", "melee", "US", (2024, 5, 5));
        no_country.country_code = None;
        assert!(!filter.accepts(&no_country));

        let date_filter = CandidateFilter::compile(FilterCriteria {
            starts_after: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            ..FilterCriteria::default()
        })
        .expect("compile");
        let mut undated = candidate("Undated", "melee", "US", (2024, 5, 5));
        undated.start_at = None;
        assert!(!date_filter.accepts(&undated));
    }

    #[test]
    fn online_flag_is_exact() {
        let filter = CandidateFilter::compile(FilterCriteria {
            online: Some(false),
            ..FilterCriteria::default()
        })
        .expect("compile");

        let mut wired = candidate("LAN", "melee", "US", (2024, 6, 1));
        assert!(filter.accepts(&wired));
        wired.online = Some(true);
        assert!(!filter.accepts(&wired));
        wired.online = None;
        assert!(!filter.accepts(&wired));
    }

    #[test]
    fn name_pattern_matches_case_insensitively() {
        let filter = CandidateFilter::compile(FilterCriteria {
            name_pattern: Some("^weekly".into()),
            ..FilterCriteria::default()
        })
        .expect("compile");

        assert!(filter.accepts(&candidate("Weekly Smash #12", "melee", "US", (2024, 1, 8))));
        assert!(!filter.accepts(&candidate("The Big House", "melee", "US", (2024, 1, 8))));
    }

    #[test]
    fn invalid_pattern_is_a_compile_error() {
        let err = CandidateFilter::compile(FilterCriteria {
            name_pattern: Some("([unclosed".into()),
            ..FilterCriteria::default()
        });
        assert!(matches!(err, Err(FilterError::InvalidPattern { .. })));
    }

    #[test]
    fn entity_count_walks_the_whole_tree() {
        let tree = TournamentTree {
            tournament: TournamentDraft {
                external_id: "T1".into(),
                name: "T1".into(),
                slug: None,
                start_at: None,
                end_at: None,
                country_code: None,
                online: None,
                game_id: None,
            },
            events: vec![EventNode {
                event: EventDraft {
                    external_id: "E1".into(),
                    name: "E1".into(),
                    game_id: None,
                    entrant_count: None,
                    state: None,
                },
                phases: vec![PhaseNode {
                    phase: PhaseDraft {
                        external_id: "P1".into(),
                        name: "P1".into(),
                        ordinal: None,
                        bracket_type: None,
                    },
                    sets: vec![SetDraft {
                        external_id: "S1".into(),
                        round: None,
                        entrant1_id: None,
                        entrant2_id: None,
                        entrant1_score: None,
                        entrant2_score: None,
                        winner_id: None,
                        completed: false,
                    }],
                }],
            }],
        };
        assert_eq!(tree.entity_count(), 4);
    }
}
