pub mod adaptive;
pub mod config;
pub mod db;
pub mod domain;
pub mod duel;
pub mod error;
pub mod handlers;
pub mod service;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
