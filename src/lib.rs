//! ptmanager - pluggable transport managed proxy engine.
//!
//! Tracks external pluggable-transport helpers through the managed proxy
//! control protocol: parses what they print, drives each one through its
//! negotiation states, and turns the result into control events, durable
//! bind addresses, extra-info descriptor lines, and helper environments.

pub mod config;
pub mod privacy;
pub mod state;
pub mod transport;
