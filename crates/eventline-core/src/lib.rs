//! Eventline Core: event name mapping, event store and projection
//! abstractions.
//!
//! This crate defines the value types, traits and the projection engine that
//! every backend shares. It contains no database code; the dialect adapters
//! and the lazy facades live in `eventline-event-store`.

pub mod clock;
pub mod config;
pub mod dialect;
pub mod error;
pub mod event;
pub mod mapper;
pub mod projection;
pub mod store;
