pub mod affordance;
pub mod api;
pub mod arena;
pub mod combat;
pub mod config;
pub mod diagnostics;
pub mod markup;
pub mod phase;
pub mod profile_lock;
pub mod retry;
pub mod runner;
pub mod session;
pub mod state;
pub mod stats;

#[cfg(test)]
mod testing;
