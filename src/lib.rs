//! Storefront Sync Library
//!
//! Materializes storefront orders as financial documents, customers,
//! addresses, territories and settlement entries in a business system.
//! Orders arrive through signed webhooks, periodic polls and a paginated
//! historical backfill; all three paths converge on
//! [`services::OrderSyncCoordinator`], which makes repeated and concurrent
//! deliveries of the same order converge on one document.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod message_queue;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod retry;
pub mod services;
pub mod storefront;
pub mod webhooks;

pub use errors::ServiceError;
pub use handlers::{router, AppState};
