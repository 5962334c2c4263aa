//! CLI command implementations.

pub mod check;
pub mod hex_utils;
pub mod image;
pub mod search;
pub mod signatures;
pub mod validate;
