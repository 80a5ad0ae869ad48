//! Three-way reconciliation of show descriptions against a live QLab
//! workspace.
//!
//! A sync compares three trees: the **source** (the show file), the
//! **cache** (a snapshot of the workspace taken after the previous sync)
//! and the **current** live state. Cues are matched by identity key (full
//! cue number, or position for unnumbered cues) and each gets a verdict:
//! create, update or skip.
//!
//! - [`reconcile`]: the verdicts, plus scope comparison for conflicts
//! - [`conflict`], [`resolver`]: conflicts as data, and who decides them
//! - [`driver`]: applies verdicts through a [`RemoteWorkspace`]
//! - [`workspace`]: the QLab implementation over `cueproto`
//! - [`snapshot`]: where the cache lives
//! - [`session`]: the whole round trip
//!
//! ```ignore
//! let workspace = Arc::new(QlabWorkspace::new(client, config.sync.clone()));
//! workspace.connect(None).await?;
//! let session = SyncSession::new(workspace, Arc::new(FileSnapshotStore::new(dir)), "show");
//! let outcome = session.transmit(&source, &PolicyResolver::new(ResolutionChoice::UseSource)).await?;
//! ```

pub mod compare;
pub mod conflict;
pub mod cue;
pub mod driver;
pub mod error;
pub mod index;
pub mod reconcile;
pub mod remote;
pub mod resolver;
pub mod scope;
pub mod session;
pub mod snapshot;
pub mod tree;
pub mod workspace;

pub use conflict::{identify_conflicts, ConflictType, CueConflict};
pub use cue::{Cue, CueField};
pub use driver::{CueMapping, DriverOptions, DriverReport, MutationDriver};
pub use error::{SyncError, SyncResult};
pub use index::CueIndex;
pub use reconcile::{reconcile, Action, ComparisonSummary, CueChangeResult, ThreeWayComparison};
pub use remote::{RemoteWorkspace, VideoStage};
pub use resolver::{
    apply_resolutions, ChannelResolver, ConflictResolver, PolicyResolver, ResolutionChoice, ResolutionPeer,
    Resolutions,
};
pub use scope::{FieldConflict, MergedScope, Scope, ScopeComparison};
pub use session::{RemoteUpdates, SyncOutcome, SyncSession};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use tree::CueTree;
pub use workspace::QlabWorkspace;
