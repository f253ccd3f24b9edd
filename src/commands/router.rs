// CommandRouter - Routes CLI arguments to appropriate Command
// Licensed under GPL-3.0

use super::{Command, ConfigExampleCommand, DatabaseCommand, StatusCommand, SyncCommand};
use crate::Args;

/// CommandRouter determines which Command to execute based on CLI arguments
///
/// Priority:
/// 1. Example configuration (--config-example)
/// 2. Database initialization (--db-init)
/// 3. Status report (--status)
/// 4. Sync (default, continuous or --once)
pub struct CommandRouter;

impl CommandRouter {
    pub fn route(args: Args) -> Box<dyn Command> {
        if let Some(path) = &args.database.config_example {
            return Box::new(ConfigExampleCommand::new(path.clone()));
        }

        if args.database.init {
            return Box::new(DatabaseCommand::new(args));
        }

        if args.sync.status {
            return Box::new(StatusCommand::new(args));
        }

        Box::new(SyncCommand::new(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_route_config_example() {
        let mut args = Args::default();
        args.database.config_example = Some(PathBuf::from("ctmirror.toml"));
        args.database.init = true;
        assert_eq!(CommandRouter::route(args).name(), "ConfigExampleCommand");
    }

    #[test]
    fn test_route_database() {
        let mut args = Args::default();
        args.database.init = true;
        assert_eq!(CommandRouter::route(args).name(), "DatabaseCommand");
    }

    #[test]
    fn test_route_status() {
        let mut args = Args::default();
        args.sync.status = true;
        assert_eq!(CommandRouter::route(args).name(), "StatusCommand");
    }

    #[test]
    fn test_route_default_sync() {
        assert_eq!(CommandRouter::route(Args::default()).name(), "SyncCommand");
    }
}
