//! Core entities — a key document and the plan policy that derives its limits.

pub mod key;
pub mod plan;

pub use key::{Key, KeyStatus};
pub use plan::{Limits, Plan};
