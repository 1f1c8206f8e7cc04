//! Tracks time spent on productive vs. distracting sites and blocks
//! navigation to the distracting ones.
//!
//! [`engine::Engine`] receives focus and navigation events from the browser,
//! [`tracker::ActivityTracker`] turns them into elapsed intervals,
//! [`classifier`] decides whether a hostname is distracting and
//! [`stats::record_duration`] merges each interval into the per-day totals.

pub mod blocklist;
pub mod browser;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod stats;
pub mod store;
pub mod tracker;
