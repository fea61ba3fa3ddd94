//! Gesture bridge library
//!
//! Hand-pose recognition, trigger detection and action routing, plus the
//! HTTP bridge that relays commands to remote helper sessions.

pub mod api;
pub mod broker;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod events;
pub mod paths;
pub mod pipeline;
pub mod pose;
pub mod router;
pub mod store;
pub mod trigger;
