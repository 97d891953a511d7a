//! Provider API client (pagination, pacing, bounded retries) and payload normalization.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use podium_core::{
    CandidateSummary, EventDraft, EventNode, FilterCriteria, PhaseDraft, PhaseNode, SetDraft,
    TournamentDraft, TournamentTree,
};

pub const CRATE_NAME: &str = "podium-provider";

/// Errors crossing the fetch-client boundary.
///
/// `RateLimited` and retryable transport failures are consumed inside the
/// retry loop; what escapes is either non-retryable or a `Transient` whose
/// attempt budget is already spent.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("tournament {0} not found")]
    NotFound(String),
    #[error("client error (http {status}) for {url}")]
    Client { status: u16, url: String },
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: usize, message: String },
    #[error("undecodable response body: {0}")]
    Decode(String),
}

/// A required field is absent or unusable. Non-retryable for the candidate,
/// never fatal to a run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedPayload {
    #[error("{entity} is missing required field {field:?}")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    #[error("{entity}.{field} timestamp {value} is out of range")]
    InvalidTimestamp {
        entity: &'static str,
        field: &'static str,
        value: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    RateLimited,
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::RateLimited
    } else if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded exponential backoff. Defaults follow the provider's observed
/// tolerance: up to five retries, 1.5s doubling, one minute cap.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 4;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Parse a `Retry-After` header value given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn retry_after_delay(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Enforces a minimum interval between outbound requests. One pacing clock is
/// shared by every call the client makes; callers queue on the lock so the
/// interval holds even under concurrent use.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn per_minute(requests: u32) -> Self {
        let interval = if requests == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(60_000 / u64::from(requests))
        };
        Self::new(interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Provider identifiers arrive as JSON numbers or strings depending on the
/// endpoint; both canonicalize to the decimal string form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    pub fn canonical(&self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSet {
    pub id: Option<RawId>,
    pub round: Option<i32>,
    pub entrant1_id: Option<RawId>,
    pub entrant2_id: Option<RawId>,
    pub entrant1_score: Option<i32>,
    pub entrant2_score: Option<i32>,
    pub winner_id: Option<RawId>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPhase {
    pub id: Option<RawId>,
    pub name: Option<String>,
    pub ordinal: Option<i32>,
    pub bracket_type: Option<String>,
    pub sets: Vec<RawSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub id: Option<RawId>,
    pub name: Option<String>,
    pub videogame_id: Option<RawId>,
    pub num_entrants: Option<i32>,
    pub state: Option<String>,
    pub phases: Vec<RawPhase>,
}

/// Full detail payload for one tournament, sub-brackets nested.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTournament {
    pub id: Option<RawId>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    pub country_code: Option<String>,
    pub is_online: Option<bool>,
    pub videogame_id: Option<RawId>,
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCandidate {
    id: Option<RawId>,
    name: Option<String>,
    country_code: Option<String>,
    start_at: Option<i64>,
    end_at: Option<i64>,
    is_online: Option<bool>,
    videogame_id: Option<RawId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEnvelope {
    #[serde(default)]
    nodes: Vec<RawCandidate>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// One page of tournament summaries plus the cursor for the next page.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePage {
    pub candidates: Vec<CandidateSummary>,
    pub next_cursor: Option<String>,
}

/// Coarse server-side filters the listing endpoint understands. The local
/// filter engine re-checks everything; these only narrow what the provider
/// bothers to return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub game_id: Option<String>,
    pub country: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl ListQuery {
    pub fn from_criteria(criteria: &FilterCriteria) -> Self {
        Self {
            game_id: criteria.game.clone(),
            country: criteria.country.clone(),
            after: criteria.starts_after,
            before: criteria.ends_before,
        }
    }

    fn to_params(&self, page_size: u32, cursor: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![("perPage", page_size.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        if let Some(game_id) = &self.game_id {
            params.push(("videogameId", game_id.clone()));
        }
        if let Some(country) = &self.country {
            params.push(("countryCode", country.clone()));
        }
        if let Some(after) = self.after {
            params.push(("afterDate", after.timestamp().to_string()));
        }
        if let Some(before) = self.before {
            params.push(("beforeDate", before.timestamp().to_string()));
        }
        params
    }
}

/// Listing + detail retrieval. Implemented by [`ProviderClient`] for the real
/// provider and by scripted fakes in coordinator tests.
#[async_trait]
pub trait TournamentProvider: Send + Sync {
    async fn list_page(
        &self,
        query: &ListQuery,
        cursor: Option<&str>,
    ) -> Result<CandidatePage, ProviderError>;

    async fn fetch_detail(&self, external_id: &str) -> Result<RawTournament, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
    pub requests_per_minute: u32,
    pub page_size: u32,
    pub backoff: BackoffPolicy,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            user_agent: None,
            timeout: Duration::from_secs(20),
            requests_per_minute: 80,
            page_size: 50,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    pacer: RequestPacer,
    backoff: BackoffPolicy,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(token) = &config.api_token {
            let mut headers = header::HeaderMap::new();
            let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .context("building authorization header")?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let http = builder.build().context("building reqwest client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.max(1),
            pacer: RequestPacer::per_minute(config.requests_per_minute),
            backoff: config.backoff,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, ProviderError> {
        let mut last_transient: Option<String> = None;

        for attempt in 0..=self.backoff.max_retries {
            self.pacer.pace().await;
            match self.http.get(url).query(params).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|err| ProviderError::Decode(err.to_string()));
                    }
                    match classify_status(status) {
                        RetryDisposition::RateLimited => {
                            // Prefer the provider-supplied delay over our own.
                            let delay = retry_after_delay(resp.headers())
                                .unwrap_or_else(|| self.backoff.delay_for_attempt(attempt));
                            last_transient = Some(format!("rate limited (http 429) at {url}"));
                            if attempt < self.backoff.max_retries {
                                warn!(
                                    url,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    "rate limited; waiting before retry"
                                );
                                tokio::time::sleep(with_jitter(delay)).await;
                                continue;
                            }
                        }
                        RetryDisposition::Retryable => {
                            last_transient = Some(format!("http {status} at {url}"));
                            if attempt < self.backoff.max_retries {
                                let delay = self.backoff.delay_for_attempt(attempt);
                                debug!(
                                    url,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    "server error; retrying"
                                );
                                tokio::time::sleep(with_jitter(delay)).await;
                                continue;
                            }
                        }
                        RetryDisposition::NonRetryable => {
                            return Err(ProviderError::Client {
                                status: status.as_u16(),
                                url: url.to_string(),
                            });
                        }
                    }
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_transient = Some(err.to_string());
                        tokio::time::sleep(with_jitter(self.backoff.delay_for_attempt(attempt)))
                            .await;
                        continue;
                    }
                    return Err(ProviderError::Transient {
                        attempts: attempt + 1,
                        message: err.to_string(),
                    });
                }
            }
        }

        Err(ProviderError::Transient {
            attempts: self.backoff.max_retries + 1,
            message: last_transient.unwrap_or_else(|| "retry budget exhausted".to_string()),
        })
    }
}

#[async_trait]
impl TournamentProvider for ProviderClient {
    async fn list_page(
        &self,
        query: &ListQuery,
        cursor: Option<&str>,
    ) -> Result<CandidatePage, ProviderError> {
        let url = format!("{}/tournaments", self.base_url);
        let params = query.to_params(self.page_size, cursor);
        let envelope: ListEnvelope = self.get_json(&url, &params).await?;

        let mut candidates = Vec::with_capacity(envelope.nodes.len());
        for raw in &envelope.nodes {
            match summary_from_raw(raw) {
                Some(candidate) => candidates.push(candidate),
                None => warn!(name = raw.name.as_deref(), "skipping listed tournament without id"),
            }
        }

        Ok(CandidatePage {
            candidates,
            next_cursor: envelope.next_cursor,
        })
    }

    async fn fetch_detail(&self, external_id: &str) -> Result<RawTournament, ProviderError> {
        let url = format!("{}/tournaments/{}", self.base_url, external_id);
        self.get_json(&url, &[]).await.map_err(|err| match err {
            ProviderError::Client { status: 404, .. } => {
                ProviderError::NotFound(external_id.to_string())
            }
            other => other,
        })
    }
}

fn summary_from_raw(raw: &RawCandidate) -> Option<CandidateSummary> {
    let external_id = raw.id.as_ref()?.canonical();
    Some(CandidateSummary {
        external_id,
        name: raw.name.clone(),
        game_id: raw.videogame_id.as_ref().map(RawId::canonical),
        country_code: raw.country_code.clone(),
        online: raw.is_online,
        start_at: raw.start_at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
        end_at: raw.end_at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
    })
}

/// Map a raw detail payload into the canonical entity tree.
///
/// Pure and deterministic: the same payload always yields the same tree.
/// Each upstream sub-bracket becomes its own event; zero events is a valid,
/// recordable state for a tournament still in setup.
pub fn normalize(raw: &RawTournament) -> Result<TournamentTree, MalformedPayload> {
    let tournament = TournamentDraft {
        external_id: required_id("tournament", raw.id.as_ref())?,
        name: required_text("tournament", "name", raw.name.as_deref())?,
        slug: raw.slug.clone(),
        start_at: optional_timestamp("tournament", "startAt", raw.start_at)?,
        end_at: optional_timestamp("tournament", "endAt", raw.end_at)?,
        country_code: raw.country_code.clone(),
        online: raw.is_online,
        game_id: raw.videogame_id.as_ref().map(RawId::canonical),
    };

    let events = raw
        .events
        .iter()
        .map(normalize_event)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TournamentTree { tournament, events })
}

fn normalize_event(raw: &RawEvent) -> Result<EventNode, MalformedPayload> {
    let event = EventDraft {
        external_id: required_id("event", raw.id.as_ref())?,
        name: required_text("event", "name", raw.name.as_deref())?,
        game_id: raw.videogame_id.as_ref().map(RawId::canonical),
        entrant_count: raw.num_entrants,
        state: raw.state.clone(),
    };
    let phases = raw
        .phases
        .iter()
        .map(normalize_phase)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EventNode { event, phases })
}

fn normalize_phase(raw: &RawPhase) -> Result<PhaseNode, MalformedPayload> {
    let phase = PhaseDraft {
        external_id: required_id("phase", raw.id.as_ref())?,
        name: required_text("phase", "name", raw.name.as_deref())?,
        ordinal: raw.ordinal,
        bracket_type: raw.bracket_type.clone(),
    };
    let sets = raw
        .sets
        .iter()
        .map(normalize_set)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PhaseNode { phase, sets })
}

fn normalize_set(raw: &RawSet) -> Result<SetDraft, MalformedPayload> {
    Ok(SetDraft {
        external_id: required_id("set", raw.id.as_ref())?,
        round: raw.round,
        entrant1_id: raw.entrant1_id.as_ref().map(RawId::canonical),
        entrant2_id: raw.entrant2_id.as_ref().map(RawId::canonical),
        entrant1_score: raw.entrant1_score,
        entrant2_score: raw.entrant2_score,
        winner_id: raw.winner_id.as_ref().map(RawId::canonical),
        completed: raw.completed.unwrap_or(false),
    })
}

fn required_id(entity: &'static str, id: Option<&RawId>) -> Result<String, MalformedPayload> {
    id.map(RawId::canonical)
        .ok_or(MalformedPayload::MissingField { entity, field: "id" })
}

fn required_text(
    entity: &'static str,
    field: &'static str,
    value: Option<&str>,
) -> Result<String, MalformedPayload> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(MalformedPayload::MissingField { entity, field }),
    }
}

fn optional_timestamp(
    entity: &'static str,
    field: &'static str,
    value: Option<i64>,
) -> Result<Option<DateTime<Utc>>, MalformedPayload> {
    match value {
        None => Ok(None),
        Some(secs) => DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or(MalformedPayload::InvalidTimestamp {
                entity,
                field,
                value: secs,
            }),
    }
}
