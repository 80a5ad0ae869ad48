//! The operations reconciliation needs from a live workspace.

use async_trait::async_trait;
use cueproto::OscArg;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::tree::CueTree;

/// A video stage as QLab lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStage {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "uniqueID", default)]
    pub unique_id: String,
}

#[async_trait]
pub trait RemoteWorkspace: Send + Sync {
    /// Create a cue of `cue_type` and return its unique ID.
    async fn create_cue(&self, cue_type: &str) -> SyncResult<String>;

    async fn set_property(&self, cue_id: &str, property: &str, value: &str) -> SyncResult<()>;

    /// Multi-argument properties such as colours and translations.
    async fn set_property_args(&self, cue_id: &str, property: &str, args: Vec<OscArg>) -> SyncResult<()>;

    async fn move_cue(&self, cue_id: &str, index: usize, parent_id: &str) -> SyncResult<()>;

    async fn delete_cue(&self, cue_id: &str) -> SyncResult<()>;

    /// Full live tree, target properties filled in.
    async fn query_state(&self) -> SyncResult<CueTree>;

    /// Cheaper query for workspaces too large for [`RemoteWorkspace::query_state`].
    async fn query_state_lightweight(&self) -> SyncResult<CueTree>;

    /// Cue lists, possibly memoised for the duration of a pass.
    async fn cue_lists(&self) -> SyncResult<CueTree>;

    async fn video_stages(&self) -> SyncResult<Vec<VideoStage>>;

    /// Directory relative media paths resolve against, if QLab knows one.
    async fn base_path(&self) -> SyncResult<Option<String>>;

    /// Forget anything memoised from earlier queries. Sessions call this
    /// at pass boundaries.
    async fn invalidate_caches(&self) {}
}
