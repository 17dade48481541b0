//! HTTP request handlers.
//!
//! One module per protocol gate plus the admin surface. Every security-
//! relevant rejection produces both the HTTP error and an audit record;
//! firmware outcomes land in the `updates` category whatever the status.

mod admin;
mod challenge;
mod firmware;
mod register;
mod verify;

pub use admin::*;
pub use challenge::*;
pub use firmware::*;
pub use register::*;
pub use verify::*;
