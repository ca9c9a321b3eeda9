//! allnews - a feed aggregator
//!
//! Collects many independently configured RSS/Atom feeds into one
//! deduplicated article store and serves it as a searchable timeline.

pub mod collector;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod routes;
pub mod tags;
