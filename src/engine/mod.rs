pub mod boards;
pub mod claim;
pub mod events;
pub mod lifecycle;
pub mod location;
pub mod route;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod supervisor;
