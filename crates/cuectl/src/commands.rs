//! CLI command implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use cueconf::CueConfig;
use cueproto::{ClientConfig, OscClient, UdpTransport};
use cuesync::snapshot::source_id;
use cuesync::{
    Action, ConflictResolver, CueTree, DriverOptions, DriverReport, FileSnapshotStore, PolicyResolver,
    QlabWorkspace, RemoteWorkspace, ResolutionChoice, SyncSession, ThreeWayComparison,
};
use owo_colors::OwoColorize;
use tracing::info;

use crate::prompt::PromptResolver;

pub struct PushOptions {
    /// Fixed answer for every conflict; `None` prompts.
    pub choice: Option<ResolutionChoice>,
    pub dry_run: bool,
    pub force_numbers: bool,
}

/// Open the reply socket and connect to the workspace.
async fn connect(config: &CueConfig, dry_run: bool) -> Result<Arc<QlabWorkspace>> {
    let conn = &config.connection;
    let transport = UdpTransport::bind(&conn.host, conn.port, conn.listen_port_attempts).await?;
    let client = OscClient::new(ClientConfig::from_settings("qlab", conn), Box::new(transport));
    let workspace = Arc::new(QlabWorkspace::new(client, config.sync.clone()).with_dry_run(dry_run));

    workspace
        .connect(conn.passcode.as_deref())
        .await
        .with_context(|| format!("failed to connect to QLab at {}:{}", conn.host, conn.port))?;
    Ok(workspace)
}

fn load_source(path: &Path) -> Result<CueTree> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    let tree = CueTree::from_value(&value).with_context(|| format!("failed to load cues from {}", path.display()))?;
    if tree.is_empty() {
        bail!("{} contains no cues", path.display());
    }
    Ok(tree)
}

fn session(config: &CueConfig, workspace: &Arc<QlabWorkspace>, source: &Path, opts: Option<&PushOptions>) -> SyncSession {
    let snapshots = Arc::new(FileSnapshotStore::new(config.sync.cache_dir.clone()));
    let options = DriverOptions {
        force_cue_numbers: opts.map(|o| o.force_numbers).unwrap_or(config.sync.force_cue_numbers),
        source_dir: source.parent().map(Path::to_path_buf),
        delete_removed: config.sync.delete_removed,
        inbox_id: workspace.inbox_id(),
    };
    let dry_run = opts.map(|o| o.dry_run).unwrap_or(false);
    SyncSession::new(workspace.clone(), snapshots, source_id(source))
        .with_options(options)
        .with_snapshots(!dry_run)
}

/// Print what a push would do
pub async fn plan(config: &CueConfig, source: &Path) -> Result<()> {
    let tree = load_source(source)?;
    let workspace = connect(config, true).await?;
    let session = session(config, &workspace, source, None);

    let comparison = session.reconcile(&tree).await;
    print_plan(&comparison);

    let conflicts = session.identify_conflicts(&comparison);
    if !conflicts.is_empty() {
        println!();
        println!("{} {}", conflicts.len().bright_yellow().bold(), "conflicts need a decision:".bright_yellow());
        for conflict in &conflicts {
            println!("  {} {}", conflict.key.bold(), conflict.description);
        }
    }
    Ok(())
}

/// Reconcile and apply a show file
pub async fn push(config: &CueConfig, source: &Path, opts: PushOptions) -> Result<()> {
    let tree = load_source(source)?;
    let workspace = connect(config, opts.dry_run).await?;
    let session = session(config, &workspace, source, Some(&opts));

    let resolver: Box<dyn ConflictResolver> = match opts.choice {
        Some(choice) => Box::new(PolicyResolver::new(choice)),
        None => Box::new(PromptResolver),
    };

    let start = Instant::now();
    let outcome = session.transmit(&tree, resolver.as_ref()).await?;
    info!(elapsed = ?start.elapsed(), "push finished");

    print_report(&outcome.report, opts.dry_run);
    if !outcome.conflicts.is_empty() {
        println!("Resolved {} conflicts", outcome.conflicts.len());
    }
    if !outcome.remote_updates.is_empty() {
        println!();
        println!("{}", "Kept from QLab (copy into the source to keep them in sync):".bright_cyan());
        println!("{}", serde_json::to_string_pretty(&outcome.remote_updates)?);
    }

    workspace.disconnect().await?;
    Ok(())
}

/// Dump the live workspace as a show file
pub async fn pull(config: &CueConfig, out: Option<&Path>) -> Result<()> {
    let workspace = connect(config, true).await?;
    let snapshots = Arc::new(FileSnapshotStore::new(config.sync.cache_dir.clone()));
    let session = SyncSession::new(workspace.clone(), snapshots, "pull").with_snapshots(false);

    let tree = session.receive().await?;
    let json = serde_json::to_string_pretty(&tree.to_value())?;
    match out {
        Some(path) => {
            std::fs::write(path, json + "\n").with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {} cues to {}", tree.cue_count(), path.display());
        }
        None => println!("{}", json),
    }

    workspace.disconnect().await?;
    Ok(())
}

/// Test connectivity with /connect and a shallow list query
pub async fn ping(config: &CueConfig) -> Result<()> {
    let start = Instant::now();
    let workspace = connect(config, true).await?;
    let id = workspace.workspace_id().unwrap_or_default();

    let lists = workspace.query_state_lightweight().await?;
    println!(
        "{} workspace {} ({} cue lists) in {:?}",
        "Connected:".bright_green().bold(),
        id,
        lists.lists.len(),
        start.elapsed()
    );

    workspace.disconnect().await?;
    Ok(())
}

fn action_label(action: Action) -> String {
    match action {
        Action::Create => "create".bright_green().to_string(),
        Action::Update => "update".bright_yellow().to_string(),
        Action::Skip => "skip".dimmed().to_string(),
    }
}

fn print_plan(comparison: &ThreeWayComparison) {
    if !comparison.has_remote_data {
        println!("{}", "QLab state unavailable; every cue will be created".bright_red());
    }
    for (key, result) in &comparison.results {
        println!("  {:<8} {:<24} {}", action_label(result.action), key, result.reason.dimmed());
        for (field, change) in &result.modified_fields {
            println!("           {}: {}", field, change);
        }
    }
    for removed in &comparison.removed {
        println!("  {:<8} {:<24} {}", "remove".bright_red(), removed.key, removed.unique_id.dimmed());
    }

    let summary = comparison.summary();
    println!();
    println!(
        "{} create, {} update, {} skip, {} removed from source",
        summary.creates, summary.updates, summary.skips, summary.removed
    );
}

fn print_report(report: &DriverReport, dry_run: bool) {
    let prefix = if dry_run { "Dry run:" } else { "Done:" };
    println!(
        "{} {} created, {} updated, {} unchanged, {} moved, {} deleted",
        prefix.bright_green().bold(),
        report.created,
        report.updated,
        report.skipped,
        report.moved,
        report.deleted
    );
    if report.targets_unresolved > 0 {
        println!(
            "{} {} cue targets could not be resolved",
            "Warning:".bright_red(),
            report.targets_unresolved
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_files_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("show.json");
        std::fs::write(&show, r#"{"cues": [{"type": "audio", "number": "1", "name": "Door"}]}"#).unwrap();
        let tree = load_source(&show).unwrap();
        assert_eq!(tree.cue_count(), 1);

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, r#"{"cues": []}"#).unwrap();
        assert!(load_source(&empty).is_err());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        let err = load_source(&broken).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));

        assert!(load_source(&dir.path().join("missing.json")).is_err());
    }
}
