pub mod api;
pub mod collector;
pub mod database;
pub mod extract;
mod http;
pub mod preview;
pub mod probe;
pub mod rpa;
pub mod web;

pub use collector::{Collector, Connectors, ConnectorSettings};
pub use preview::{PreviewError, StructurePreview};
pub use probe::{ConnectionProbe, ProbeStatus};
