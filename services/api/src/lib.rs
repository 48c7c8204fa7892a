pub mod adapters;
pub mod config;
pub mod error;
pub mod guide;
pub mod startup;
pub mod web;
