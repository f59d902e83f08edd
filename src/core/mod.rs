pub mod error;
pub mod identity;

pub use error::{Invariant, Result, StateError};
pub use identity::{Identity, IdentityAllocator, SequentialAllocator};
