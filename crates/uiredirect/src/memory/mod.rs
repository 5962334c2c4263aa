mod patch;
mod process;

#[cfg(test)]
mod mock;

pub use patch::*;
pub use process::*;

#[cfg(test)]
pub use mock::MockCodeWriter;
