//! Fleet Client
//!
//! HTTP implementation of [`fleet_core::Client`] for the Woodpecker CI
//! server API.

mod client;

pub use client::{PER_PAGE, ServerClient};
