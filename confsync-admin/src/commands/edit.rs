//! Edit-and-commit commands
//!
//! Each invocation is one edit session: load the remote snapshot, apply
//! the mutation, push. With `--merge` a push rejected for staleness is
//! rebased onto the latest remote state and retried once.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use tracing::warn;

use confsync_core::error::ConfigResult;
use confsync_core::modificator::Modificator;

#[derive(Subcommand)]
pub enum EditCommands {
    /// Set an option value (missing sections are created)
    Set { path: String, value: String },
    /// Merge a local configuration file over the remote state (the file
    /// wins on conflicts)
    MergeFile { file: PathBuf },
    /// Replace the comment on a section or option
    SetComment { path: String, text: String },
    /// Create an empty section
    CreateSection { path: String },
    /// Rename a key within its parent
    Rename { path: String, new_name: String },
    /// Copy a key (with its whole subtree) within its parent
    Copy { path: String, new_name: String },
    /// Delete an option
    RemoveOption { path: String },
    /// Delete a section and its subtree
    RemoveSection { path: String },
}

fn apply(session: &mut Modificator, command: &EditCommands) -> ConfigResult<()> {
    match command {
        EditCommands::Set { path, value } => session.set_option(path, value.clone()),
        EditCommands::MergeFile { file } => session.merge_from_file(file),
        EditCommands::SetComment { path, text } => {
            session.set_comment(path, text).map(|_| ())
        }
        EditCommands::CreateSection { path } => session.create_section(path),
        EditCommands::Rename { path, new_name } => session.rename_key(path, new_name),
        EditCommands::Copy { path, new_name } => session.copy_key(path, new_name),
        EditCommands::RemoveOption { path } => session.remove_option(path),
        EditCommands::RemoveSection { path } => session.remove_section(path),
    }
}

pub async fn execute_edit_command(
    session: &mut Modificator,
    command: EditCommands,
    merge: bool,
) -> Result<()> {
    session.load_from_remote().await?;
    apply(session, &command)?;

    match session.commit().await {
        Ok(version) => {
            println!("committed, configuration now at version {version}");
            Ok(())
        }
        Err(e) if e.is_retryable() && merge => {
            warn!("push rejected as stale, rebasing onto the latest version");
            session.merge_with_server().await?;
            apply(session, &command)?;
            let version = session.commit().await?;
            println!("committed after merge, configuration now at version {version}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
