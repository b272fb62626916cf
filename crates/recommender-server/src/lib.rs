//! HTTP service boundary of the node-pool recommender

pub mod api;
pub mod config;
