//! Core domain types
//!
//! These types describe what the compiler consumes (pipeline graphs and
//! configuration) and what it reads back from the warehouse (task history and
//! execution reports).

pub mod config;
pub mod execution;
pub mod graph;
pub mod task;
