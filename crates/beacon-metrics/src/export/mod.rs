//! Exporters: consumers of registry snapshots.
//!
//! - [`openmetrics`]: full-snapshot text rendering for scrape endpoints
//! - [`push`]: incremental, batched publishing through a [`push::Transport`]

pub mod openmetrics;
pub mod push;

pub use openmetrics::{CONTENT_TYPE, render, render_registry};
pub use push::{PushExporter, PushReport, Transport, TransportError};
