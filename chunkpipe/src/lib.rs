pub mod allocator;
pub mod arena;
pub mod chunk;
pub mod config;
pub mod error;
pub mod index;
pub mod iter;
pub mod pipe;
pub mod prelude;
pub mod recycler;
pub mod slot;
