//! Guild status widget backend.
//!
//! Polls a Discord guild for member counts and recent media, caches the
//! latest snapshot and serves it over a small JSON API.

pub mod config;
pub mod engine;
pub mod platform;
pub mod web;
