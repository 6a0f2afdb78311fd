//! Shared plumbing for the cardlock workspace.

pub mod logging;
