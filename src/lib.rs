pub mod algorithm;
pub mod common;
pub mod config;
pub mod map;
pub mod scenario;
pub mod solver;
pub mod stat;
