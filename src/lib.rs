pub mod config;
pub mod directory;
pub mod notify;
pub mod shared;
pub mod tests;
pub mod tickets;
