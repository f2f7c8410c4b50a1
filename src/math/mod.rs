//! Rational number primitives used by the AMM model.

pub mod fraction;
pub mod percent;

pub use fraction::{Fraction, Rounding, pow10};
pub use percent::Percent;
