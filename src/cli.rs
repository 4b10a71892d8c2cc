//! Command-line interface for the pageforge demo binary.

use clap::{Parser, Subcommand, ValueEnum};

use pageforge::model::Audience;

/// Asynchronous coloring-page generation pipeline.
#[derive(Debug, Parser)]
#[command(name = "pageforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose (debug-level) logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// CLI audience argument, mapped to [`Audience`] internally.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AudienceArg {
    Toddler,
    Kid,
    Teen,
    Adult,
}

impl From<AudienceArg> for Audience {
    fn from(arg: AudienceArg) -> Self {
        match arg {
            AudienceArg::Toddler => Audience::Toddler,
            AudienceArg::Kid => Audience::Kid,
            AudienceArg::Teen => Audience::Teen,
            AudienceArg::Adult => Audience::Adult,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a full generation job end-to-end against in-memory services.
    Demo {
        /// Number of pages to generate.
        #[arg(long, default_value_t = 4)]
        pages: u32,

        /// Target audience for the book.
        #[arg(long, value_enum, default_value_t = AudienceArg::Kid)]
        audience: AudienceArg,

        /// The idea to expand into pages.
        #[arg(long, default_value = "a curious fox exploring the forest")]
        idea: String,
    },

    /// Run the quality gate on a local image file and print the report.
    Check {
        /// Path to a PNG or JPEG image.
        file: String,
    },
}
