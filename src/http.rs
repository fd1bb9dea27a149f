//! HTTP helpers shared by discovery and key retrieval.

pub mod client;
