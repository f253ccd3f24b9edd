// DatabaseCommand - Create or upgrade the schema
// Licensed under GPL-3.0

use super::Command;
use crate::db::{migrations, schema_version, MirrorDatabase};
use crate::Args;
use async_trait::async_trait;
use tracing::info;

/// DatabaseCommand connects to the configured database and runs any pending
/// migrations, then exits
pub struct DatabaseCommand {
    args: Args,
}

impl DatabaseCommand {
    pub fn new(args: Args) -> Self {
        Self { args }
    }
}

#[async_trait]
impl Command for DatabaseCommand {
    async fn execute(&self) -> anyhow::Result<()> {
        let config = self.args.load_config()?;

        info!("Initializing {:?} database", config.database.db_type);
        let db = MirrorDatabase::new(&config.database, None).await?;
        let version = schema_version(db.pool()).await?;
        db.close().await;

        println!(
            "✓ Database initialized successfully (schema version {}/{})",
            version,
            migrations::latest_version()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DatabaseCommand"
    }
}
