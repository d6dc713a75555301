//! Point-in-time restore

use anyhow::Result;

use confsync_core::modificator::Modificator;

pub async fn execute_rollback_command(session: &Modificator, version: &str) -> Result<()> {
    let restored = session.rollback_to_version(version).await?;
    println!("rolled back to contents of {version}, configuration now at version {restored}");
    Ok(())
}
