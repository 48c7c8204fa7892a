pub mod adapters;
pub mod config;
pub mod error;
pub mod generator;
pub mod worker_loop;
