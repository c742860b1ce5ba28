//! Catering raw material allocations
//!
//! Converts recipe quantities between measurement units, scales them to guest
//! counts, snaps them to purchasable amounts and keeps one allocation row per
//! (placement, raw material) or (function, raw material) for every order.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod services;

pub use errors::{AppError, ServiceError};
