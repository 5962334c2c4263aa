//! Signatures command implementation.

use std::path::Path;

use anyhow::Result;
use uiredirect::{builtin_signatures, save_signatures};

/// Write the built-in table to `output`, or stdout.
pub fn run(output: Option<&Path>) -> Result<()> {
    let table = builtin_signatures();

    match output {
        Some(path) => {
            save_signatures(path, &table)?;
            println!("Wrote signature table '{}' to {}", table.version, path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&table)?),
    }

    Ok(())
}
