// ============================================================================
// Audit Domain - Reference epoch and stock reconciliation rows
// ============================================================================

pub mod value_objects;
pub mod csv;

pub use value_objects::*;
pub use csv::audit_csv;
