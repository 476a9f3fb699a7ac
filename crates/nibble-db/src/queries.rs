//! Database query functions organized by table.

pub mod activities;
pub mod categories;
pub mod deltas;
pub mod quarantine;
pub mod settings;
pub mod sync_state;
