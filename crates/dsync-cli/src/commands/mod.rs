//! Command handlers

pub mod proposals;
pub mod sync;
