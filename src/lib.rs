//! # Stagehand: Dynamic Application Loader
//!
//! Stagehand decides which independently deployed front-end applications
//! belong on the page the user is looking at, and brings each of them up
//! exactly once per navigation context.
//!
//! ## Pipeline
//!
//! ```text
//! host event → Navigation Tracker → Lifecycle Reset → Resolver → Activation Engine
//! ```
//!
//! ### Registration
//!
//! The [`registry`] holds one immutable [`registry::AppDescriptor`] per
//! application: where it applies, which assets it needs, how its
//! configuration is built and which entry point starts it. A JSON
//! [`manifest`] can produce the same table.
//!
//! ### Navigation and reset
//!
//! The [`navigation`] tracker remembers the last section and sub-view ids the
//! host reported. When the section changes, [`lifecycle`] clears every
//! activation record except the persistent application's.
//!
//! ### Resolution
//!
//! The [`resolver`] combines declarative matching with structural rules that
//! probe rendered containers or user attributes, producing an ordered,
//! duplicate-free list of candidate keys.
//!
//! ### Activation
//!
//! The [`activation`] engine loads prerequisites in order, publishes the
//! built configuration, invokes the entry point and records the key as
//! active. Failures are isolated per key.
//!
//! ## Runtime
//!
//! A [`coordinator::Coordinator`] owns a [`context::LoaderContext`] and wires
//! the stages together against the page-side capabilities in [`host`].
//! Lifecycle events and failures are broadcast on the [`event_bus`].
//! [`replay`] drives the whole pipeline from a recorded scenario.

pub mod activation;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod event_bus;
pub mod host;
pub mod lifecycle;
pub mod manifest;
pub mod navigation;
pub mod registry;
pub mod replay;
pub mod resolver;

// Re-exports
pub use coordinator::*;
pub use error::*;
