//! # Cadsched — Core Library
//!
//! A deterministic, four-stage batch pipeline that derives a construction
//! schedule from raw 3D CAD extracts.
//!
//! ## Pipeline Stages
//!
//! Each stage is a pure transform over JSON; stages communicate only through
//! artifacts in a shared working directory, never in-memory state:
//!
//! - [`clean`] — joins CAD layers with their matching solid and flattens the
//!   result into a bounding-boxed activity record.
//! - [`duration`] — classifies each activity's construction `Type` and
//!   assigns a `Duration` via a median-normalized power law.
//! - [`sequence`] — infers predecessor edges from spatial adjacency within
//!   each construction work area, then orders activities with a stable
//!   topological sort.
//! - [`critical`] — merges the sequenced activities and edges, then runs the
//!   Critical Path Method forward/backward pass.
//!
//! ## Infrastructure
//!
//! - [`model`] — shared record and activity types flowing between stages.
//! - [`normalize`] — case-folding, whitespace collapsing, CWA extraction.
//! - [`store`] — atomic working-directory persistence (`*_latest.json` plus
//!   timestamped archives).
//! - [`pipeline`] — wires the stages to working-directory artifacts; the
//!   one implementation both `dashboard` and the CLI stage subcommands call.
//! - [`error`] — typed errors mapped to HTTP status codes at the boundary.
//! - [`dashboard`] — the Axum HTTP server exposing each stage as an endpoint.
//!
//! `main.rs`'s CLI subcommand handlers live in `src/cli.rs`, compiled only
//! into the binary (they're `anyhow`/stdout-oriented, not library surface).

pub mod clean;
pub mod critical;
pub mod dashboard;
pub mod duration;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod sequence;
pub mod store;
