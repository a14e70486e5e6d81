// ============================================================================
// Product Domain - Per-size stock as seen by the order engine
// ============================================================================

pub mod value_objects;

pub use value_objects::*;
