//! Conflict resolution: who decides, and how the decision is applied.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::conflict::CueConflict;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{reasons, Action, ThreeWayComparison};
use crate::scope::ValueSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionChoice {
    UseSource,
    KeepRemote,
    Skip,
}

impl ResolutionChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionChoice::UseSource => "use-source",
            ResolutionChoice::KeepRemote => "keep-remote",
            ResolutionChoice::Skip => "skip",
        }
    }
}

impl fmt::Display for ResolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionChoice {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" | "use-source" => Ok(ResolutionChoice::UseSource),
            "remote" | "keep-remote" => Ok(ResolutionChoice::KeepRemote),
            "skip" => Ok(ResolutionChoice::Skip),
            other => Err(SyncError::Resolution(format!(
                "unknown resolution '{}' (expected source, remote or skip)",
                other
            ))),
        }
    }
}

/// Identity key → decision.
pub type Resolutions = BTreeMap<String, ResolutionChoice>;

/// Decides a whole batch of conflicts at once.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, conflicts: &[CueConflict]) -> SyncResult<Resolutions>;
}

/// Answers every conflict the same way.
#[derive(Debug, Clone, Copy)]
pub struct PolicyResolver {
    choice: ResolutionChoice,
}

impl PolicyResolver {
    pub fn new(choice: ResolutionChoice) -> Self {
        Self { choice }
    }
}

#[async_trait]
impl ConflictResolver for PolicyResolver {
    async fn resolve(&self, conflicts: &[CueConflict]) -> SyncResult<Resolutions> {
        Ok(conflicts
            .iter()
            .map(|c| (c.key.clone(), self.choice))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct ConflictResolutionRequest {
    pub id: String,
    pub conflicts: Vec<CueConflict>,
}

#[derive(Debug, Clone)]
pub struct ConflictResolutionResponse {
    pub id: String,
    pub resolutions: Resolutions,
}

/// Hands the batch to whoever holds the [`ResolutionPeer`] (a UI task,
/// a test) and waits for the answer.
pub struct ChannelResolver {
    requests: mpsc::Sender<ConflictResolutionRequest>,
    responses: Mutex<mpsc::Receiver<ConflictResolutionResponse>>,
    next_id: AtomicU64,
}

/// The answering side of a [`ChannelResolver`].
pub struct ResolutionPeer {
    pub requests: mpsc::Receiver<ConflictResolutionRequest>,
    pub responses: mpsc::Sender<ConflictResolutionResponse>,
}

impl ChannelResolver {
    pub fn channel() -> (Self, ResolutionPeer) {
        let (req_tx, req_rx) = mpsc::channel(1);
        let (resp_tx, resp_rx) = mpsc::channel(1);
        (
            Self {
                requests: req_tx,
                responses: Mutex::new(resp_rx),
                next_id: AtomicU64::new(1),
            },
            ResolutionPeer {
                requests: req_rx,
                responses: resp_tx,
            },
        )
    }
}

#[async_trait]
impl ConflictResolver for ChannelResolver {
    async fn resolve(&self, conflicts: &[CueConflict]) -> SyncResult<Resolutions> {
        let id = format!("conflict-req-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        // One batch in flight at a time
        let mut responses = self.responses.lock().await;

        self.requests
            .send(ConflictResolutionRequest {
                id: id.clone(),
                conflicts: conflicts.to_vec(),
            })
            .await
            .map_err(|_| SyncError::Resolution("resolution peer has gone away".to_string()))?;
        debug!("Sent conflict resolution request {}", id);

        let response = responses
            .recv()
            .await
            .ok_or_else(|| SyncError::Resolution("resolution peer closed without answering".to_string()))?;

        if response.id != id {
            return Err(SyncError::Resolution(format!(
                "response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }
        Ok(response.resolutions)
    }
}

impl ResolutionPeer {
    pub async fn next_request(&mut self) -> Option<ConflictResolutionRequest> {
        self.requests.recv().await
    }

    pub async fn respond(&self, id: &str, resolutions: Resolutions) -> SyncResult<()> {
        self.responses
            .send(ConflictResolutionResponse {
                id: id.to_string(),
                resolutions,
            })
            .await
            .map_err(|_| SyncError::Resolution("resolver stopped waiting".to_string()))
    }
}

/// Write decisions back into the per-cue results. Keys the comparison
/// doesn't know are ignored.
pub fn apply_resolutions(comparison: &mut ThreeWayComparison, resolutions: &Resolutions) {
    for (key, choice) in resolutions {
        let Some(result) = comparison.results.get_mut(key) else {
            warn!("Resolution for unknown cue {}, ignoring", key);
            continue;
        };

        let (action, reason, chosen) = match choice {
            ResolutionChoice::UseSource => (Action::Update, reasons::USER_CHOSE_SOURCE, ValueSource::Source),
            ResolutionChoice::KeepRemote => (Action::Skip, reasons::USER_CHOSE_REMOTE, ValueSource::Remote),
            ResolutionChoice::Skip => (Action::Skip, reasons::USER_SKIPPED, ValueSource::Remote),
        };
        result.action = action;
        result.reason = reason.to_string();
        result.has_changed = action != Action::Skip;
        for field in result.field_conflicts.values_mut() {
            field.choose(chosen);
        }

        if *choice == ResolutionChoice::KeepRemote {
            comparison.remote_chosen.insert(key.clone());
        }
        if let Some(scope) = comparison.scope.as_mut().and_then(|s| s.find_mut(key)) {
            scope.resolved = true;
            for field in scope.field_changes.values_mut() {
                field.choose(chosen);
            }
        }
        info!("Resolved {}: {}", key, choice);
    }
}
