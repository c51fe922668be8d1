//! Readits HTTP API Service.
//!
//! This crate wires the escrow engine over a [`readits_store::Store`] and exposes it over
//! HTTP:
//!
//! - Wallet balances and ledger history
//! - Rental and purchase requests through approval, pickup, return and rating
//! - The Xendit wallet top-up callback
//! - A background janitor that expires stale requests and opens confirmation windows
//!
//! # Authentication
//!
//! End-user routes take an HS256 bearer JWT whose `sub` is the user id. The top-up
//! webhook is authenticated by a shared callback token instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
