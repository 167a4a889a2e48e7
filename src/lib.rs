//! Lifecourse - rule-driven simulation of synthetic patient histories
//!
//! Disease and care workflows are authored as JSON state machines
//! ([`module::Module`]), loaded once into a shared [`module::Registry`], and
//! executed per agent by an [`engine::Executor`].

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod agent;
pub mod config;
pub mod driver;
pub mod engine;
pub mod logic;
pub mod module;
pub mod population;
pub mod time;

pub use time::Timestamp;
