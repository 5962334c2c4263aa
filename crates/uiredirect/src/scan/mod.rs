mod disasm;
#[cfg(test)]
pub(crate) mod fixture;
mod image;
mod locate;
mod pattern;
mod pdata;
mod signature;

pub use disasm::*;
pub use image::*;
pub use locate::*;
pub use pattern::*;
pub use pdata::*;
pub use signature::*;
