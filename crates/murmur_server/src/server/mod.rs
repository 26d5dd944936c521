#![forbid(unsafe_code)]

pub mod connection;
pub mod context;
pub mod error;
pub mod handler;
pub mod health;
pub mod hub;
pub mod import;
pub mod locks;
pub mod membership;
pub mod registry;
pub mod store;


#[cfg(test)]
mod hub_tests;

#[cfg(test)]
mod ws_smoke_tests;
