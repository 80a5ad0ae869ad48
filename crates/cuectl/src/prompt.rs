//! Interactive conflict resolution on the terminal.

use async_trait::async_trait;
use cuesync::{ConflictResolver, CueConflict, FieldConflict, ResolutionChoice, Resolutions, SyncError, SyncResult};
use dialoguer::{theme::ColorfulTheme, Select};
use owo_colors::OwoColorize;

const CHOICES: [ResolutionChoice; 3] = [
    ResolutionChoice::UseSource,
    ResolutionChoice::KeepRemote,
    ResolutionChoice::Skip,
];

/// Asks about each conflict in turn.
pub struct PromptResolver;

#[async_trait]
impl ConflictResolver for PromptResolver {
    async fn resolve(&self, conflicts: &[CueConflict]) -> SyncResult<Resolutions> {
        let conflicts = conflicts.to_vec();
        // dialoguer blocks on the terminal
        tokio::task::spawn_blocking(move || ask_all(&conflicts))
            .await
            .map_err(|e| SyncError::Resolution(format!("prompt task failed: {}", e)))?
    }
}

fn ask_all(conflicts: &[CueConflict]) -> SyncResult<Resolutions> {
    let mut resolutions = Resolutions::new();
    let labels: Vec<&str> = CHOICES.iter().map(|c| label(*c)).collect();

    for (i, conflict) in conflicts.iter().enumerate() {
        println!();
        println!(
            "{} {} {}",
            format!("[{}/{}]", i + 1, conflicts.len()).dimmed(),
            conflict.key.bold(),
            conflict.conflict_type.as_str().yellow()
        );
        println!("  {}", conflict.description);
        for field in conflict.field_conflicts.values() {
            println!("{}", describe_field(field));
        }

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Cue {}", conflict.key))
            .items(&labels)
            .default(0)
            .interact()
            .map_err(|e| SyncError::Resolution(e.to_string()))?;
        resolutions.insert(conflict.key.clone(), CHOICES[selection]);
    }
    Ok(resolutions)
}

fn label(choice: ResolutionChoice) -> &'static str {
    match choice {
        ResolutionChoice::UseSource => "Use source",
        ResolutionChoice::KeepRemote => "Keep remote",
        ResolutionChoice::Skip => "Skip",
    }
}

fn show(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("'{}'", v),
        None => "-".to_string(),
    }
}

/// One line per field: `name  source 'A' | cache 'B' | remote 'C'`.
fn describe_field(field: &FieldConflict) -> String {
    format!(
        "    {:<16} source {} | cache {} | remote {}",
        field.field,
        show(&field.source_value),
        show(&field.cache_value),
        show(&field.remote_value)
    )
}
