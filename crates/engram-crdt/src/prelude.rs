//! Convenient re-exports for common usage.
//!
//! ```
//! use engram_crdt::prelude::*;
//! ```

pub use crate::Crdt;
pub use crate::GCounter;
pub use crate::GSet;
pub use crate::LWWRegister;
pub use crate::ORSet;
pub use crate::{CausalOrder, VectorClock};
pub use crate::{MemoryDocument, MemoryType};
