// ============================================================================
// Domain Layer - Business Types
// ============================================================================
//
// Plain data and pure rules for the storefront core:
// - order/    - Orders, items, status machine, checkout validation, errors
// - product/  - Products with per-size stock, stock history entries
// - audit/    - Reference epoch, audit rows and CSV projection
//
// Storage and orchestration live in src/store and src/engine.
//
// ============================================================================

pub mod admin;
pub mod audit;
pub mod order;
pub mod product;

pub use admin::AdminContext;
