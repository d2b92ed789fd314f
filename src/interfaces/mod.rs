//! Boundary adapters for external collaborators (CSV replay and exports).

pub mod csv;
