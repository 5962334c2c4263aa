//! Command line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "uiredirect")]
#[command(about = "Signature tooling for the uiredirect VR plugin")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that every signature resolves in a game executable
    Check {
        /// Path to the game executable
        exe: PathBuf,

        /// JSON signature table to use instead of the built-in one
        #[arg(short, long)]
        signatures: Option<PathBuf>,
    },

    /// List every match of a byte pattern in a game executable
    Search {
        exe: PathBuf,

        /// Byte pattern, e.g. "81 3D ? ? ? ? 80 07 00 00"
        pattern: String,

        /// Stop after this many matches
        #[arg(short, long, default_value_t = 32)]
        limit: usize,
    },

    /// Write the built-in signature table as JSON
    Signatures {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse and validate a JSON signature table
    Validate { path: PathBuf },
}
