//! Read-only browsing of the live configuration

use anyhow::Result;
use clap::Subcommand;

use confsync_core::modificator::Modificator;

#[derive(Subcommand)]
pub enum ShowCommands {
    /// List subsections of a path
    Sections {
        /// Section path, e.g. "Resources" (root when omitted)
        #[arg(default_value = "")]
        path: String,
    },
    /// List options of a path
    Options {
        #[arg(default_value = "")]
        path: String,
    },
    /// Print one option value
    Value { path: String },
    /// Print the comment attached to a path
    Comment { path: String },
    /// Print the whole configuration as text
    Dump,
    /// Print the current version token
    Version,
}

pub async fn execute_show_command(session: &mut Modificator, command: ShowCommands) -> Result<()> {
    session.load_from_remote().await?;
    match command {
        ShowCommands::Sections { path } => {
            for name in session.sections(&path)? {
                println!("{name}");
            }
        }
        ShowCommands::Options { path } => {
            for name in session.options(&path)? {
                println!("{name}");
            }
        }
        ShowCommands::Value { path } => match session.value(&path) {
            Some(value) => println!("{value}"),
            None => println!("option '{path}' not found"),
        },
        ShowCommands::Comment { path } => match session.comment(&path) {
            Some(comment) if !comment.is_empty() => println!("{comment}"),
            Some(_) => println!("(no comment)"),
            None => println!("path '{path}' not found"),
        },
        ShowCommands::Dump => print!("{}", session.dump()),
        ShowCommands::Version => println!("{}", session.base_version()),
    }
    Ok(())
}
