use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Rendering mode of a root. Decides whether updates are bucketed at all.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TypeOfMode: u8 {
        const STRICT = 0b0001;
        const BATCHED = 0b0010;
        const CONCURRENT = 0b0100;
        const PROFILE = 0b1000;
    }
}

impl TypeOfMode {
    pub const NO_MODE: Self = Self::empty();

    /// Batched and concurrent: the mode in which priorities map to buckets.
    pub fn concurrent() -> Self {
        Self::BATCHED | Self::CONCURRENT
    }
}

impl Default for TypeOfMode {
    fn default() -> Self {
        Self::concurrent()
    }
}
