use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "xdedup",
    version,
    about = "Cross-site deduplicating file sync",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $XDEDUP_CONFIG              (environment variable)
  3. ./xdedup.yaml               (project)
Without a config file every setting takes its default.

Environment variables:
  XDEDUP_CONFIG       Path to configuration file
  XDEDUP_PASSPHRASE   Site passphrase (skips interactive prompt)"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides XDEDUP_CONFIG and ./xdedup.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Chunk, deduplicate and store files in a site
    Upload {
        /// Site directory
        #[arg(short, long)]
        site: String,

        /// Files to upload; each is stored under the path as given
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Rebuild a stored file
    Restore {
        /// Site directory
        #[arg(short, long)]
        site: String,

        /// Stored file name
        name: String,

        /// Destination path
        out: String,
    },

    /// Copy stored files from one site to another, sending only chunks the
    /// destination does not hold
    Sync {
        /// Source site directory
        #[arg(long)]
        from: String,

        /// Destination site directory
        #[arg(long)]
        to: String,

        /// Stored file names to copy (all files if omitted)
        names: Vec<String>,
    },

    /// List stored files
    List {
        /// Site directory
        #[arg(short, long)]
        site: String,
    },

    /// Print a starter configuration file, or write it to DEST
    Config {
        /// Where to write the file
        #[arg(long)]
        dest: Option<String>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Upload { .. } => "upload",
            Commands::Restore { .. } => "restore",
            Commands::Sync { .. } => "sync",
            Commands::List { .. } => "list",
            Commands::Config { .. } => "config",
        }
    }
}
