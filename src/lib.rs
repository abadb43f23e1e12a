//! Valve Control - monitoring and control service for a remote gate valve
//!
//! This library exposes the core modules for testing and reuse.

pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod render;
pub mod routes;
pub mod services;
pub mod session;
pub mod store;
pub mod sync;
