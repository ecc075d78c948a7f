#![allow(dead_code)]
#![warn(unused_crate_dependencies)]

mod migration;
mod types;
mod vm;

extern crate alloc;
extern crate core;

pub use migration::*;
pub use types::*;
pub use vm::*;

/// Raw cell buffers cross the native-import ABI as small vectors.
pub use smallvec::SmallVec;

#[cfg(test)]
use assert_matches as _;
#[cfg(test)]
use hex_literal as _;
#[cfg(test)]
use rand as _;
