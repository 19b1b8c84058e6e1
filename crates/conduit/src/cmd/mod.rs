//! Command implementations for the Conduit CLI

pub mod check;
pub mod serve;
