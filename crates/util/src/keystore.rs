//! Secret storage and placeholder interpolation.

mod interpolation;

pub use interpolation::*;
