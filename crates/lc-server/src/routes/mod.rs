//! Route handlers for the HTTP API.

pub mod convert;
pub mod formats;
pub mod health;
