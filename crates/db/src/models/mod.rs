//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A create DTO for inserts
//! - Query/result helper structs where the repository needs them

pub mod attribution_attempt;
pub mod change_history;
pub mod click;
pub mod conversion;
pub mod model_version;
pub mod pending_change;
pub mod rate_limit;
pub mod status;
