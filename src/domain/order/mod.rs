// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (Order, OrderItem, OrderStatus and its transition rules)
// - Commands (CheckoutPayload and its validation into a ValidatedCart)
// - Errors (OrderError enum)
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod errors;

// Re-export for convenience
pub use value_objects::*;
pub use commands::*;
pub use errors::*;
