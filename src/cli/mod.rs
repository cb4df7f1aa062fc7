//! CLI command definitions and parsing
use crate::retrieval::FusionStrategy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "meld",
    version,
    author = "neur0map",
    about = "Multi-engine retrieval fusion with health-driven strategy selection",
    long_about = "Meld queries a keyword engine and a vector engine, picks a strategy from \
                  their measured health, fuses the ranked lists, and protects each engine \
                  with a circuit breaker. Results are cached and identical concurrent \
                  requests share one execution."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/meld/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Config profile to apply (e.g., "fast", "accuracy")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one search over a corpus
    Search {
        /// Search query text
        query: String,

        /// Corpus file (JSON); defaults to engines.corpus_path
        #[arg(long, value_name = "FILE")]
        corpus: Option<PathBuf>,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Fusion algorithm (weighted_sum, rrf, cascade)
        #[arg(short, long)]
        strategy: Option<FusionStrategy>,

        /// Weight of the vector engine (keyword weight is the complement)
        #[arg(long)]
        vector_weight: Option<f32>,

        /// Restrict to knowledge bases (repeatable)
        #[arg(long = "kb", value_name = "ID")]
        knowledge_bases: Vec<String>,

        /// Skip the initial health assessment
        #[arg(long)]
        no_health: bool,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Answer JSON-lines requests on stdin until EOF or a signal
    Serve {
        /// Corpus file (JSON); defaults to engines.corpus_path
        #[arg(long, value_name = "FILE")]
        corpus: Option<PathBuf>,
    },

    /// Assess engines and show system status
    Status {
        /// Corpus file (JSON); defaults to engines.corpus_path
        #[arg(long, value_name = "FILE")]
        corpus: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Set a configuration value and save the file
    Set {
        /// Configuration key in dot notation (e.g., "cache.capacity")
        key: String,

        /// Value to set
        value: String,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_flags() {
        let cli = Cli::try_parse_from([
            "meld", "search", "vpn setup", "-k", "5", "--strategy", "rrf", "--kb", "it", "--kb",
            "hr", "--format", "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                query,
                top_k,
                strategy,
                knowledge_bases,
                format,
                ..
            } => {
                assert_eq!(query, "vpn setup");
                assert_eq!(top_k, Some(5));
                assert_eq!(strategy, Some(FusionStrategy::Rrf));
                assert_eq!(knowledge_bases, vec!["it", "hr"]);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(Cli::try_parse_from(["meld", "search", "q", "--strategy", "magic"]).is_err());
    }
}
