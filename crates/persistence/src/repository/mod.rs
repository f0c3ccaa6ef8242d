//! Repository implementations for database operations

pub mod indicator_state;
pub mod prices;
pub mod reports;

pub use indicator_state::*;
pub use prices::*;
pub use reports::*;
