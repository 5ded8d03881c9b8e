//! Time-boxed auction and raffle allocation of market stalls.
//!
//! Listings, their ledgers and stall availability live in Postgres. The
//! [`domain::Coordinator`] exposes the allocation operations; the binary only
//! runs the [`sweeper::Sweeper`] which resolves listings whose deadline has
//! passed.

pub mod arguments;
pub mod domain;
pub mod infra;
pub mod run;
pub mod shutdown_controller;
pub mod sweeper;

pub use self::run::{run, start};
