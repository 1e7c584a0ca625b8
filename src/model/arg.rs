use clap::{Parser, Subcommand};

/// Drivebox: manage your Google Drive session from the command line
#[derive(Parser, Debug)]
#[command(name = "drivebox", version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Token file path (overrides tokenPath from the config file)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Env file holding client credentials (overrides envFile from the config file)
    #[arg(long, global = true)]
    pub env_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate with Google Drive
    Auth {
        #[command(subcommand)]
        action: Option<AuthAction>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Sign in to Google Drive using OAuth2
    In,
    /// Sign out and clear the stored token
    Out,
    /// Check whether the current session is authenticated
    Check,
    /// Provide client credentials for your own Google Cloud project
    Setup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_in() {
        let args = Args::try_parse_from(["drivebox", "auth", "in"]).unwrap();
        match args.command {
            Command::Auth { action } => assert_eq!(action, Some(AuthAction::In)),
        }
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_auth_without_action() {
        let args = Args::try_parse_from(["drivebox", "auth"]).unwrap();
        match args.command {
            Command::Auth { action } => assert!(action.is_none()),
        }
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let args = Args::try_parse_from([
            "drivebox", "auth", "check", "--token", "/tmp/t.json", "-c", "cfg.json",
        ])
        .unwrap();
        assert_eq!(args.token.as_deref(), Some("/tmp/t.json"));
        assert_eq!(args.config.as_deref(), Some("cfg.json"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(Args::try_parse_from(["drivebox", "auth", "refresh"]).is_err());
    }
}
