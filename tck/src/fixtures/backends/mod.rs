//! Engine implementations shipped with the harness.

pub mod reference;
