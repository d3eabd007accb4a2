//! Telemetry ingestion.
//!
//! - `types`: samples and the wire decoder
//! - `transport`: connectors that open a message stream
//! - `supervisor`: the receive loop feeding the sample buffer

pub mod supervisor;
pub mod transport;
pub mod types;

pub use supervisor::{ConnectionEvent, EventSink, StreamSupervisor, SupervisorError, SupervisorEvent};
pub use transport::{Connector, MessageStream, ReplayConnector, TransportError, WebSocketConnector};
pub use types::{decode_message, DecodeError, Sample};
