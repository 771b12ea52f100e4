//! Audible → Calibre sync library - shared modules for both binaries.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fields;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod safety;
pub mod scoring;
pub mod sync;
