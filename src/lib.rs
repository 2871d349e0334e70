//! orca - workflow ticket REST integration
//!
//! Fills JSON request templates from workflow platform tickets, sends them to
//! third-party REST endpoints when tickets change, and maps the replies back
//! into ticket fields. Credentials live in an encrypted local store.

pub mod config;
pub mod functions;
pub mod integration;
pub mod logging;
pub mod plugins;
pub mod secrets;
pub mod services;
pub mod ticket;
