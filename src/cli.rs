use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "security-master")]
#[command(about = "Security master lookup service and daily vendor upsert", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// Fetch the vendor universe and merge it into the securities table
    Upsert {
        /// Run against an in-memory table and print the report
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply pending database migrations and exit
    Migrate,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::parse_from(["security-master"]);
        assert_eq!(cli.command(), Commands::Serve);
    }

    #[test]
    fn test_upsert_dry_run_flag() {
        let cli = Cli::parse_from(["security-master", "upsert", "--dry-run"]);
        assert_eq!(cli.command(), Commands::Upsert { dry_run: true });
        let cli = Cli::parse_from(["security-master", "upsert"]);
        assert_eq!(cli.command(), Commands::Upsert { dry_run: false });
    }
}
