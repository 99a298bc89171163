#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// The special orthogonal group SO(3) in double precision.
pub mod so3;

pub use so3::SO3;
