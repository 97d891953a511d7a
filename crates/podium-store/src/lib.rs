//! Persistence for reconciled tournament trees, run checkpoints, and the game registry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use podium_core::{
    Checkpoint, EventDraft, PhaseDraft, ReconcileCounts, ReconcileOutcome, SetDraft,
    TournamentDraft, TournamentTree,
};

pub const CRATE_NAME: &str = "podium-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("{entity} {external_id} already belongs to parent {stored_parent}, refusing reparent to {incoming_parent}")]
    Consistency {
        entity: &'static str,
        external_id: String,
        stored_parent: String,
        incoming_parent: String,
    },
    #[error("checkpoint i/o failed: {0}")]
    Checkpoint(String),
    #[error("migration failed: {0}")]
    Migration(String),
}

/// A known game: local code plus the provider's videogame identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSeed {
    pub code: String,
    pub display_name: String,
    pub provider_id: String,
}

/// The games this deployment tracks out of the box. Seeded idempotently; a
/// job may still name a provider id directly for anything not listed here.
pub fn default_games() -> Vec<GameSeed> {
    vec![
        GameSeed {
            code: "melee".to_string(),
            display_name: "Super Smash Bros. Melee".to_string(),
            provider_id: "1".to_string(),
        },
        GameSeed {
            code: "ultimate".to_string(),
            display_name: "Super Smash Bros. Ultimate".to_string(),
            provider_id: "1386".to_string(),
        },
    ]
}

/// Upserts one candidate's entity subtree atomically and owns checkpoint
/// storage. Implemented by [`PgStore`] for Postgres and [`MemStore`] for
/// tests and dry runs; both commit a tree all-or-nothing.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Reconcile a normalized subtree top-down, keyed by external identifier
    /// at every level. Reconciling the identical tree twice yields all
    /// `unchanged` counts the second time.
    async fn reconcile(&self, tree: &TournamentTree) -> Result<ReconcileOutcome, StoreError>;

    async fn load_checkpoint(&self, job_key: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn save_checkpoint(
        &self,
        job_key: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError>;

    /// Look up the provider id for a game code; `None` when the code is not
    /// in the registry.
    async fn resolve_game(&self, code: &str) -> Result<Option<String>, StoreError>;

    async fn seed_games(&self, games: &[GameSeed]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Migration(err.to_string()))
    }
}

async fn upsert_tournament(
    tx: &mut Transaction<'_, Postgres>,
    draft: &TournamentDraft,
    counts: &mut ReconcileCounts,
) -> Result<i64, StoreError> {
    let existing = sqlx::query(
        "SELECT id, name, slug, start_at, end_at, country_code, online, game_id \
         FROM tournaments WHERE external_id = $1",
    )
    .bind(&draft.external_id)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            let row = sqlx::query(
                "INSERT INTO tournaments \
                 (external_id, name, slug, start_at, end_at, country_code, online, game_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
            )
            .bind(&draft.external_id)
            .bind(&draft.name)
            .bind(&draft.slug)
            .bind(draft.start_at)
            .bind(draft.end_at)
            .bind(&draft.country_code)
            .bind(draft.online)
            .bind(&draft.game_id)
            .fetch_one(&mut **tx)
            .await?;
            counts.inserted += 1;
            Ok(row.get("id"))
        }
        Some(row) => {
            let id: i64 = row.get("id");
            let changed = row.get::<String, _>("name") != draft.name
                || row.get::<Option<String>, _>("slug") != draft.slug
                || row.get::<Option<DateTime<Utc>>, _>("start_at") != draft.start_at
                || row.get::<Option<DateTime<Utc>>, _>("end_at") != draft.end_at
                || row.get::<Option<String>, _>("country_code") != draft.country_code
                || row.get::<Option<bool>, _>("online") != draft.online
                || row.get::<Option<String>, _>("game_id") != draft.game_id;
            if changed {
                sqlx::query(
                    "UPDATE tournaments SET name = $2, slug = $3, start_at = $4, end_at = $5, \
                     country_code = $6, online = $7, game_id = $8, updated_at = now() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(&draft.name)
                .bind(&draft.slug)
                .bind(draft.start_at)
                .bind(draft.end_at)
                .bind(&draft.country_code)
                .bind(draft.online)
                .bind(&draft.game_id)
                .execute(&mut **tx)
                .await?;
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
            Ok(id)
        }
    }
}

async fn upsert_event(
    tx: &mut Transaction<'_, Postgres>,
    tournament_id: i64,
    draft: &EventDraft,
    counts: &mut ReconcileCounts,
) -> Result<i64, StoreError> {
    let existing = sqlx::query(
        "SELECT id, tournament_id, name, game_id, entrant_count, state \
         FROM events WHERE external_id = $1",
    )
    .bind(&draft.external_id)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            let row = sqlx::query(
                "INSERT INTO events (external_id, tournament_id, name, game_id, entrant_count, state) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(&draft.external_id)
            .bind(tournament_id)
            .bind(&draft.name)
            .bind(&draft.game_id)
            .bind(draft.entrant_count)
            .bind(&draft.state)
            .fetch_one(&mut **tx)
            .await?;
            counts.inserted += 1;
            Ok(row.get("id"))
        }
        Some(row) => {
            let id: i64 = row.get("id");
            let stored_parent: i64 = row.get("tournament_id");
            if stored_parent != tournament_id {
                return Err(StoreError::Consistency {
                    entity: "event",
                    external_id: draft.external_id.clone(),
                    stored_parent: stored_parent.to_string(),
                    incoming_parent: tournament_id.to_string(),
                });
            }
            let changed = row.get::<String, _>("name") != draft.name
                || row.get::<Option<String>, _>("game_id") != draft.game_id
                || row.get::<Option<i32>, _>("entrant_count") != draft.entrant_count
                || row.get::<Option<String>, _>("state") != draft.state;
            if changed {
                sqlx::query(
                    "UPDATE events SET name = $2, game_id = $3, entrant_count = $4, state = $5 \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(&draft.name)
                .bind(&draft.game_id)
                .bind(draft.entrant_count)
                .bind(&draft.state)
                .execute(&mut **tx)
                .await?;
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
            Ok(id)
        }
    }
}

async fn upsert_phase(
    tx: &mut Transaction<'_, Postgres>,
    event_id: i64,
    draft: &PhaseDraft,
    counts: &mut ReconcileCounts,
) -> Result<i64, StoreError> {
    let existing = sqlx::query(
        "SELECT id, event_id, name, ordinal, bracket_type FROM phases WHERE external_id = $1",
    )
    .bind(&draft.external_id)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            let row = sqlx::query(
                "INSERT INTO phases (external_id, event_id, name, ordinal, bracket_type) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(&draft.external_id)
            .bind(event_id)
            .bind(&draft.name)
            .bind(draft.ordinal)
            .bind(&draft.bracket_type)
            .fetch_one(&mut **tx)
            .await?;
            counts.inserted += 1;
            Ok(row.get("id"))
        }
        Some(row) => {
            let id: i64 = row.get("id");
            let stored_parent: i64 = row.get("event_id");
            if stored_parent != event_id {
                return Err(StoreError::Consistency {
                    entity: "phase",
                    external_id: draft.external_id.clone(),
                    stored_parent: stored_parent.to_string(),
                    incoming_parent: event_id.to_string(),
                });
            }
            let changed = row.get::<String, _>("name") != draft.name
                || row.get::<Option<i32>, _>("ordinal") != draft.ordinal
                || row.get::<Option<String>, _>("bracket_type") != draft.bracket_type;
            if changed {
                sqlx::query(
                    "UPDATE phases SET name = $2, ordinal = $3, bracket_type = $4 WHERE id = $1",
                )
                .bind(id)
                .bind(&draft.name)
                .bind(draft.ordinal)
                .bind(&draft.bracket_type)
                .execute(&mut **tx)
                .await?;
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
            Ok(id)
        }
    }
}

async fn upsert_set(
    tx: &mut Transaction<'_, Postgres>,
    phase_id: i64,
    draft: &SetDraft,
    counts: &mut ReconcileCounts,
) -> Result<(), StoreError> {
    let existing = sqlx::query(
        "SELECT id, phase_id, round, entrant1_id, entrant2_id, entrant1_score, entrant2_score, \
         winner_id, completed FROM sets WHERE external_id = $1",
    )
    .bind(&draft.external_id)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO sets (external_id, phase_id, round, entrant1_id, entrant2_id, \
                 entrant1_score, entrant2_score, winner_id, completed) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&draft.external_id)
            .bind(phase_id)
            .bind(draft.round)
            .bind(&draft.entrant1_id)
            .bind(&draft.entrant2_id)
            .bind(draft.entrant1_score)
            .bind(draft.entrant2_score)
            .bind(&draft.winner_id)
            .bind(draft.completed)
            .execute(&mut **tx)
            .await?;
            counts.inserted += 1;
        }
        Some(row) => {
            let id: i64 = row.get("id");
            let stored_parent: i64 = row.get("phase_id");
            if stored_parent != phase_id {
                return Err(StoreError::Consistency {
                    entity: "set",
                    external_id: draft.external_id.clone(),
                    stored_parent: stored_parent.to_string(),
                    incoming_parent: phase_id.to_string(),
                });
            }
            let changed = row.get::<Option<i32>, _>("round") != draft.round
                || row.get::<Option<String>, _>("entrant1_id") != draft.entrant1_id
                || row.get::<Option<String>, _>("entrant2_id") != draft.entrant2_id
                || row.get::<Option<i32>, _>("entrant1_score") != draft.entrant1_score
                || row.get::<Option<i32>, _>("entrant2_score") != draft.entrant2_score
                || row.get::<Option<String>, _>("winner_id") != draft.winner_id
                || row.get::<bool, _>("completed") != draft.completed;
            if changed {
                sqlx::query(
                    "UPDATE sets SET round = $2, entrant1_id = $3, entrant2_id = $4, \
                     entrant1_score = $5, entrant2_score = $6, winner_id = $7, completed = $8 \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(draft.round)
                .bind(&draft.entrant1_id)
                .bind(&draft.entrant2_id)
                .bind(draft.entrant1_score)
                .bind(draft.entrant2_score)
                .bind(&draft.winner_id)
                .bind(draft.completed)
                .execute(&mut **tx)
                .await?;
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl IngestStore for PgStore {
    async fn reconcile(&self, tree: &TournamentTree) -> Result<ReconcileOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = ReconcileOutcome::default();

        // Top-down so child foreign keys always resolve within this
        // transaction. Any error drops `tx` and rolls the whole tree back.
        let tournament_id =
            upsert_tournament(&mut tx, &tree.tournament, &mut outcome.tournaments).await?;
        for event_node in &tree.events {
            let event_id =
                upsert_event(&mut tx, tournament_id, &event_node.event, &mut outcome.events)
                    .await?;
            for phase_node in &event_node.phases {
                let phase_id =
                    upsert_phase(&mut tx, event_id, &phase_node.phase, &mut outcome.phases).await?;
                for set in &phase_node.sets {
                    upsert_set(&mut tx, phase_id, set, &mut outcome.sets).await?;
                }
            }
        }

        tx.commit().await?;
        debug!(
            tournament = %tree.tournament.external_id,
            inserted = outcome.inserted(),
            updated = outcome.updated(),
            unchanged = outcome.unchanged(),
            "reconciled tournament subtree"
        );
        Ok(outcome)
    }

    async fn load_checkpoint(&self, job_key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT cursor, last_candidate, updated_at FROM checkpoints WHERE job_key = $1",
        )
        .bind(job_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StoreError::Checkpoint(err.to_string()))?;

        Ok(row.map(|row| Checkpoint {
            cursor: row.get("cursor"),
            last_candidate: row.get("last_candidate"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save_checkpoint(
        &self,
        job_key: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO checkpoints (job_key, cursor, last_candidate, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (job_key) DO UPDATE SET cursor = EXCLUDED.cursor, \
             last_candidate = EXCLUDED.last_candidate, updated_at = EXCLUDED.updated_at",
        )
        .bind(job_key)
        .bind(&checkpoint.cursor)
        .bind(&checkpoint.last_candidate)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::Checkpoint(err.to_string()))?;
        Ok(())
    }

    async fn resolve_game(&self, code: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT provider_id FROM games WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("provider_id")))
    }

    async fn seed_games(&self, games: &[GameSeed]) -> Result<u64, StoreError> {
        let mut upserted = 0u64;
        for game in games {
            sqlx::query(
                "INSERT INTO games (code, display_name, provider_id) VALUES ($1, $2, $3) \
                 ON CONFLICT (code) DO UPDATE SET display_name = EXCLUDED.display_name, \
                 provider_id = EXCLUDED.provider_id",
            )
            .bind(&game.code)
            .bind(&game.display_name)
            .bind(&game.provider_id)
            .execute(&self.pool)
            .await?;
            upserted += 1;
        }
        Ok(upserted)
    }
}

#[derive(Debug, Clone, Default)]
struct MemState {
    tournaments: HashMap<String, TournamentDraft>,
    events: HashMap<String, (String, EventDraft)>,
    phases: HashMap<String, (String, PhaseDraft)>,
    sets: HashMap<String, (String, SetDraft)>,
    checkpoints: HashMap<String, Checkpoint>,
    games: HashMap<String, (String, String)>,
}

/// In-memory store with the same reconcile semantics as [`PgStore`].
///
/// Mutations apply to a copy of the state that replaces the original only on
/// success, so a mid-tree consistency failure leaves nothing half-written,
/// matching the guarantee the Postgres transaction gives.
#[derive(Debug, Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// (tournaments, events, phases, sets) currently stored.
    pub async fn entity_counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state.lock().await;
        (
            state.tournaments.len(),
            state.events.len(),
            state.phases.len(),
            state.sets.len(),
        )
    }

    pub async fn tournament(&self, external_id: &str) -> Option<TournamentDraft> {
        self.state.lock().await.tournaments.get(external_id).cloned()
    }
}

fn mem_upsert_child<T: Clone + PartialEq>(
    map: &mut HashMap<String, (String, T)>,
    entity: &'static str,
    external_id: &str,
    parent_key: &str,
    draft: &T,
    counts: &mut ReconcileCounts,
) -> Result<(), StoreError> {
    match map.get(external_id) {
        None => {
            map.insert(
                external_id.to_string(),
                (parent_key.to_string(), draft.clone()),
            );
            counts.inserted += 1;
        }
        Some((stored_parent, stored)) => {
            if stored_parent != parent_key {
                return Err(StoreError::Consistency {
                    entity,
                    external_id: external_id.to_string(),
                    stored_parent: stored_parent.clone(),
                    incoming_parent: parent_key.to_string(),
                });
            }
            if stored != draft {
                map.insert(
                    external_id.to_string(),
                    (parent_key.to_string(), draft.clone()),
                );
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl IngestStore for MemStore {
    async fn reconcile(&self, tree: &TournamentTree) -> Result<ReconcileOutcome, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let mut outcome = ReconcileOutcome::default();

        let draft = &tree.tournament;
        match next.tournaments.get(&draft.external_id) {
            None => {
                next.tournaments
                    .insert(draft.external_id.clone(), draft.clone());
                outcome.tournaments.inserted += 1;
            }
            Some(stored) if stored != draft => {
                next.tournaments
                    .insert(draft.external_id.clone(), draft.clone());
                outcome.tournaments.updated += 1;
            }
            Some(_) => outcome.tournaments.unchanged += 1,
        }

        for event_node in &tree.events {
            let event = &event_node.event;
            mem_upsert_child(
                &mut next.events,
                "event",
                &event.external_id,
                &draft.external_id,
                event,
                &mut outcome.events,
            )?;
            for phase_node in &event_node.phases {
                let phase = &phase_node.phase;
                mem_upsert_child(
                    &mut next.phases,
                    "phase",
                    &phase.external_id,
                    &event.external_id,
                    phase,
                    &mut outcome.phases,
                )?;
                for set in &phase_node.sets {
                    mem_upsert_child(
                        &mut next.sets,
                        "set",
                        &set.external_id,
                        &phase.external_id,
                        set,
                        &mut outcome.sets,
                    )?;
                }
            }
        }

        *guard = next;
        Ok(outcome)
    }

    async fn load_checkpoint(&self, job_key: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.state.lock().await.checkpoints.get(job_key).cloned())
    }

    async fn save_checkpoint(
        &self,
        job_key: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .checkpoints
            .insert(job_key.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn resolve_game(&self, code: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .games
            .get(code)
            .map(|(_, provider_id)| provider_id.clone()))
    }

    async fn seed_games(&self, games: &[GameSeed]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        for game in games {
            state.games.insert(
                game.code.clone(),
                (game.display_name.clone(), game.provider_id.clone()),
            );
        }
        Ok(games.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podium_core::{EventNode, PhaseNode};

    fn sample_tree() -> TournamentTree {
        TournamentTree {
            tournament: TournamentDraft {
                external_id: "T1".into(),
                name: "Winter Clash".into(),
                slug: Some("winter-clash".into()),
                start_at: None,
                end_at: None,
                country_code: Some("US".into()),
                online: Some(false),
                game_id: Some("1".into()),
            },
            events: vec![
                EventNode {
                    event: EventDraft {
                        external_id: "E1".into(),
                        name: "Melee Singles".into(),
                        game_id: Some("1".into()),
                        entrant_count: Some(64),
                        state: Some("COMPLETED".into()),
                    },
                    phases: vec![PhaseNode {
                        phase: PhaseDraft {
                            external_id: "P1".into(),
                            name: "Top 8".into(),
                            ordinal: Some(2),
                            bracket_type: Some("DOUBLE_ELIMINATION".into()),
                        },
                        sets: vec![SetDraft {
                            external_id: "S1".into(),
                            round: Some(1),
                            entrant1_id: Some("901".into()),
                            entrant2_id: Some("902".into()),
                            entrant1_score: Some(3),
                            entrant2_score: Some(1),
                            winner_id: Some("901".into()),
                            completed: true,
                        }],
                    }],
                },
                EventNode {
                    event: EventDraft {
                        external_id: "E2".into(),
                        name: "Ultimate Singles".into(),
                        game_id: Some("1386".into()),
                        entrant_count: None,
                        state: None,
                    },
                    phases: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn fresh_tree_inserts_every_entity() {
        let store = MemStore::new();
        let outcome = store.reconcile(&sample_tree()).await.expect("reconcile");

        assert_eq!(outcome.tournaments.inserted, 1);
        assert_eq!(outcome.events.inserted, 2);
        assert_eq!(outcome.phases.inserted, 1);
        assert_eq!(outcome.sets.inserted, 1);
        assert_eq!(outcome.updated(), 0);
        assert_eq!(outcome.unchanged(), 0);
        assert_eq!(store.entity_counts().await, (1, 2, 1, 1));
    }

    #[tokio::test]
    async fn reconciling_twice_is_idempotent() {
        let store = MemStore::new();
        let tree = sample_tree();
        store.reconcile(&tree).await.expect("first");
        let second = store.reconcile(&tree).await.expect("second");

        assert_eq!(second.inserted(), 0);
        assert_eq!(second.updated(), 0);
        assert_eq!(second.unchanged(), 5);
        assert_eq!(store.entity_counts().await, (1, 2, 1, 1));
    }

    #[tokio::test]
    async fn name_only_change_updates_the_tournament_alone() {
        let store = MemStore::new();
        let mut tree = sample_tree();
        store.reconcile(&tree).await.expect("first");

        tree.tournament.name = "Winter Clash (rescheduled)".into();
        let outcome = store.reconcile(&tree).await.expect("second");

        assert_eq!(outcome.tournaments.updated, 1);
        assert_eq!(outcome.events.unchanged, 2);
        assert_eq!(outcome.phases.unchanged, 1);
        assert_eq!(outcome.sets.unchanged, 1);
        assert_eq!(
            store.tournament("T1").await.expect("stored").name,
            "Winter Clash (rescheduled)"
        );
    }

    #[tokio::test]
    async fn reparenting_is_rejected_and_rolls_back() {
        let store = MemStore::new();
        store.reconcile(&sample_tree()).await.expect("first");

        // Same event id arriving under a different tournament.
        let mut stolen = sample_tree();
        stolen.tournament.external_id = "T2".into();
        stolen.events.truncate(1);

        let err = store.reconcile(&stolen).await.expect_err("must fail");
        assert!(matches!(err, StoreError::Consistency { entity: "event", .. }));

        // Nothing from the failed tree landed, T2 included.
        assert_eq!(store.entity_counts().await, (1, 2, 1, 1));
        assert!(store.tournament("T2").await.is_none());
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_and_overwrite() {
        let store = MemStore::new();
        assert!(store.load_checkpoint("melee-us").await.expect("load").is_none());

        let first = Checkpoint {
            cursor: Some("page-3".into()),
            last_candidate: Some("T40".into()),
            updated_at: Utc::now(),
        };
        store
            .save_checkpoint("melee-us", &first)
            .await
            .expect("save");
        assert_eq!(
            store.load_checkpoint("melee-us").await.expect("load"),
            Some(first.clone())
        );

        let advanced = Checkpoint {
            cursor: Some("page-4".into()),
            last_candidate: Some("T41".into()),
            updated_at: Utc::now(),
        };
        store
            .save_checkpoint("melee-us", &advanced)
            .await
            .expect("save");
        assert_eq!(
            store.load_checkpoint("melee-us").await.expect("load"),
            Some(advanced)
        );
    }

    #[tokio::test]
    async fn game_seeding_is_idempotent() {
        let store = MemStore::new();
        let games = default_games();
        assert_eq!(store.seed_games(&games).await.expect("seed"), 2);
        assert_eq!(store.seed_games(&games).await.expect("seed again"), 2);
        assert_eq!(
            store.resolve_game("melee").await.expect("resolve"),
            Some("1".to_string())
        );
        assert_eq!(store.resolve_game("chess").await.expect("resolve"), None);
    }

    // Postgres integration coverage mirrors the in-memory tests; run with a
    // disposable database: TEST_DATABASE_URL=postgres://... cargo test -- --ignored
    fn test_database_url() -> String {
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set")
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn pg_reconcile_roundtrip() {
        let store = PgStore::connect(&test_database_url()).await.expect("connect");
        store.migrate().await.expect("migrate");
        sqlx::query("DELETE FROM tournaments")
            .execute(store.pool())
            .await
            .expect("clean");

        let tree = sample_tree();
        let first = store.reconcile(&tree).await.expect("first");
        assert_eq!(first.inserted(), 5);

        let second = store.reconcile(&tree).await.expect("second");
        assert_eq!(second.inserted(), 0);
        assert_eq!(second.unchanged(), 5);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn pg_checkpoint_roundtrip() {
        let store = PgStore::connect(&test_database_url()).await.expect("connect");
        store.migrate().await.expect("migrate");
        sqlx::query("DELETE FROM checkpoints")
            .execute(store.pool())
            .await
            .expect("clean");

        let checkpoint = Checkpoint {
            cursor: None,
            last_candidate: Some("T1".into()),
            updated_at: Utc::now(),
        };
        store
            .save_checkpoint("pg-test", &checkpoint)
            .await
            .expect("save");
        let loaded = store
            .load_checkpoint("pg-test")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(loaded.last_candidate, checkpoint.last_candidate);
    }
}
