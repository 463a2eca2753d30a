//! Contract with the remote progress service.
//!
//! The remote is a hosted REST-ish service holding the authoritative copy of
//! every progress record. All calls carry an opaque bearer token; a rejected
//! token is a hard `Unauthorized` failure and must not be retried as if it
//! were transient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    ClientId, ConflictStrategy, CourseOutline, DayId, DayProgress, QuizScore, SyncableRecord,
    derive_completion_percentage,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout for remote calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Transport(reqwest::Error),
}

impl RemoteError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Timeouts, transport failures, and throttling/server statuses are
    /// transient; auth rejections and client-error statuses are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout | RemoteError::Transport(_) => true,
            RemoteError::Status(status) => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            RemoteError::Unauthorized => false,
        }
    }
}

/// Wire shape of one per-day progress record.
///
/// The remote speaks camelCase JSON and carries a completion flag rather
/// than a percentage; the percentage is re-derived locally from the course
/// outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub day_id: u8,
    #[serde(default)]
    pub completed_sections: Vec<String>,
    #[serde(default)]
    pub completed_slides: Vec<String>,
    #[serde(default)]
    pub quiz_scores: BTreeMap<String, u8>,
    #[serde(default)]
    pub current_slide: u32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub sync_version: i64,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl RemoteRecord {
    /// Serializes a local record into the shape the remote expects.
    #[must_use]
    pub fn from_record(record: &SyncableRecord) -> Self {
        let progress = &record.progress;
        Self {
            day_id: progress.day().value(),
            completed_sections: progress.completed_sections().to_vec(),
            completed_slides: progress.completed_slides().to_vec(),
            quiz_scores: progress
                .quiz_scores()
                .iter()
                .map(|(quiz, score)| (quiz.clone(), score.value()))
                .collect(),
            current_slide: progress.current_slide(),
            is_completed: progress.is_completed(),
            completed_at: progress.completed_at(),
            updated_at: progress.last_accessed(),
            sync_version: record.sync_version,
            client_id: Some(record.client_id.as_str().to_owned()),
        }
    }

    /// Rebuilds a validated local record, re-deriving the completion
    /// percentage from the outline.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first validation failure.
    pub fn to_progress(&self, outline: &CourseOutline) -> Result<DayProgress, String> {
        let day = DayId::new(self.day_id).map_err(|e| e.to_string())?;

        let mut quiz_scores = BTreeMap::new();
        for (quiz, raw) in &self.quiz_scores {
            let score = QuizScore::new(*raw).map_err(|e| e.to_string())?;
            quiz_scores.insert(quiz.clone(), score);
        }

        let section_count =
            u32::try_from(self.completed_sections.len()).map_err(|e| e.to_string())?;
        let percentage = derive_completion_percentage(section_count, outline.sections_for(day));
        // Honor the remote completion flag only when the sections back it
        // up; a flag from an older course revision with no sections behind
        // it cannot satisfy the completion invariant.
        let completed_at = if percentage == 100 && !self.completed_sections.is_empty() {
            self.completed_at.or(Some(self.updated_at))
        } else {
            None
        };

        DayProgress::from_persisted(
            day,
            self.completed_sections.clone(),
            self.completed_slides.clone(),
            quiz_scores,
            self.current_slide,
            percentage,
            completed_at,
            self.updated_at,
        )
        .map_err(|e| e.to_string())
    }

    /// Attributed origin of this record's latest write.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id.clone().map(ClientId::new)
    }
}

/// Conflict detected by the remote while applying a push, reported alongside
/// the resolved outcome. Not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub day_id: u8,
    #[serde(default)]
    pub local_data: Option<RemoteRecord>,
    #[serde(default)]
    pub remote_data: Option<RemoteRecord>,
    #[serde(default)]
    pub resolved_data: Option<RemoteRecord>,
}

/// Outcome of pushing a batch: the authoritative resolved records plus any
/// conflicts the remote detected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    #[serde(default)]
    pub conflicts: Vec<ConflictReport>,
}

/// Remote collaborator holding the authoritative progress records.
#[async_trait]
pub trait RemoteProgress: Send + Sync {
    /// Fetch all records for the authenticated user, optionally restricted
    /// to those updated after `since`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on auth, transport, or protocol failure.
    async fn fetch_updated_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;

    /// Upsert a batch of records under the given conflict strategy; the
    /// remote returns the resolved authoritative records.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on auth, transport, or protocol failure.
    async fn push_batch(
        &self,
        records: &[RemoteRecord],
        strategy: ConflictStrategy,
    ) -> Result<PushResponse, RemoteError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushRequest<'a> {
    strategy: ConflictStrategy,
    records: &'a [RemoteRecord],
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    records: Vec<RemoteRecord>,
}

/// HTTP implementation of the remote contract.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    /// # Errors
    ///
    /// Returns `RemoteError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(RemoteError::Transport)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

fn map_reqwest(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(err)
    }
}

fn check_status(status: StatusCode) -> Result<(), RemoteError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Unauthorized);
    }
    if !status.is_success() {
        return Err(RemoteError::Status(status));
    }
    Ok(())
}

#[async_trait]
impl RemoteProgress for HttpRemote {
    async fn fetch_updated_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let mut request = self
            .client
            .get(self.endpoint("progress"))
            .bearer_auth(&self.token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await.map_err(map_reqwest)?;
        check_status(response.status())?;

        let body: FetchResponse = response.json().await.map_err(map_reqwest)?;
        Ok(body.records)
    }

    async fn push_batch(
        &self,
        records: &[RemoteRecord],
        strategy: ConflictStrategy,
    ) -> Result<PushResponse, RemoteError> {
        let response = self
            .client
            .post(self.endpoint("progress/batch"))
            .bearer_auth(&self.token)
            .json(&PushRequest { strategy, records })
            .send()
            .await
            .map_err(map_reqwest)?;
        check_status(response.status())?;

        response.json().await.map_err(map_reqwest)
    }
}
