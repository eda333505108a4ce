use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum ChunkPipeErrors {
    #[error("Expected a valid slot, got null")]
    NonexistentSlot,

    #[error("Slot generation does not match the stored chunk")]
    GenerationMismatch,

    #[error("Allocator could not provide storage for {requested} elements")]
    AllocationFailed { requested: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
