pub mod backend;
pub mod cache;
pub mod device;
pub mod directions;
pub mod memory;
