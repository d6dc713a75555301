//! Commit history and audit diffs

use anyhow::Result;
use clap::Subcommand;

use confsync_core::modificator::Modificator;

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List archived commits, newest first
    List {
        /// Maximum number of entries (0 = all)
        #[arg(default_value = "20")]
        limit: usize,
    },
    /// Line diff between two archived versions
    Diff { from: String, to: String },
    /// Line diff between the live remote state and an archived version
    Current { version: String },
}

pub async fn execute_history_command(
    session: &mut Modificator,
    command: HistoryCommands,
) -> Result<()> {
    match command {
        HistoryCommands::List { limit } => {
            let entries = session.history(limit).await?;
            if entries.is_empty() {
                println!("no commits archived");
                return Ok(());
            }
            for entry in entries {
                println!("{}  {}", entry.version, entry.committer);
            }
        }
        HistoryCommands::Diff { from, to } => {
            print!("{}", session.version_diff(&from, &to).await?);
        }
        HistoryCommands::Current { version } => {
            // Compare the archived version against the live remote state.
            session.load_from_remote().await?;
            let live = session.base_version();
            print!("{}", session.version_diff(&version, &live).await?);
        }
    }
    Ok(())
}
