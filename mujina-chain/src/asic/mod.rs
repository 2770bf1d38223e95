//! ASIC families spoken to by this crate.

pub mod inno;
