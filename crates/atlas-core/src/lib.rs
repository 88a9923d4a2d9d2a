//! Driver for the ATLAS-9 / SYNTHE / DFSYNTHE stellar-atmosphere suite:
//! builds control decks, launches the Fortran executables, tracks model
//! convergence and validates what the tools actually computed.

pub mod abundance;
pub mod artifacts;
pub mod cards;
pub mod common;
pub mod convergence;
pub mod domain;
pub mod formatting;
pub mod metadata;
pub mod orchestrator;
pub mod restart;
pub mod settings;
pub mod stages;
