//! Supervises the live connection to the telemetry source.
//!
//! The receive loop runs on a dedicated single-worker tokio runtime. It decodes
//! each message, appends the samples to the shared [`SampleBuffer`], and reports
//! connectivity changes through an event sink. Sample delivery never goes through
//! the event sink; only the first sample of a connection is announced.
//!
//! The supervisor may be owned from inside another tokio runtime. There it never
//! calls `block_on`; it waits for aborted tasks by polling and shuts its own
//! runtime down in the background.

use crate::buffer::SampleBuffer;
use crate::stats::SharedStats;
use crate::stream::transport::Connector;
use crate::stream::types::decode_message;
use chrono::Utc;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Connectivity changes reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport reported an established connection
    Connected,
    /// The first decoded sample of this logical connection reached the buffer
    FirstSample,
    /// The connection closed (by the peer or by `disconnect()`)
    Disconnected,
    /// A connect attempt or the receive path failed
    Error(String),
}

/// A connectivity event tagged with the logical connection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorEvent {
    pub connection_id: u64,
    pub kind: ConnectionEvent,
}

/// Where the supervisor delivers its events.
pub type EventSink = Arc<dyn Fn(SupervisorEvent) + Send + Sync>;

/// Errors raised while setting up the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to start telemetry runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Owns the connection to the telemetry source.
pub struct StreamSupervisor {
    connector: Arc<dyn Connector>,
    buffer: Arc<SampleBuffer>,
    stats: SharedStats,
    events: EventSink,
    reconnect_delay: Option<Duration>,
    handle: Handle,
    // Only taken in `Drop`.
    runtime: Option<Runtime>,
    task: Option<JoinHandle<()>>,
    link_up: Arc<AtomicBool>,
    current_connection: Option<u64>,
    next_connection: u64,
}

impl StreamSupervisor {
    /// Create a supervisor feeding `buffer`.
    ///
    /// `reconnect_delay` controls retries after a failed or closed connection;
    /// `None` means a single attempt per `connect()`.
    pub fn new(
        connector: Arc<dyn Connector>,
        buffer: Arc<SampleBuffer>,
        stats: SharedStats,
        events: EventSink,
        reconnect_delay: Option<Duration>,
    ) -> Result<Self, SupervisorError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("telemetry-rx")
            .enable_all()
            .build()?;

        Ok(Self {
            connector,
            buffer,
            stats,
            events,
            reconnect_delay,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            task: None,
            link_up: Arc::new(AtomicBool::new(false)),
            current_connection: None,
            next_connection: 1,
        })
    }

    /// Start connecting in the background and return the logical connection id.
    ///
    /// The outcome is reported through the event sink. Calling this while a
    /// connection is already active returns the active id.
    pub fn connect(&mut self) -> u64 {
        if let (Some(id), Some(task)) = (self.current_connection, self.task.as_ref()) {
            if !task.is_finished() {
                return id;
            }
        }
        self.reap();

        let connection_id = self.next_connection;
        self.next_connection += 1;

        tracing::info!(
            connection_id,
            source = %self.connector.describe(),
            "connecting to telemetry source"
        );

        let ctx = ReceiveLoop {
            connection_id,
            connector: Arc::clone(&self.connector),
            buffer: Arc::clone(&self.buffer),
            stats: Arc::clone(&self.stats),
            events: Arc::clone(&self.events),
            reconnect_delay: self.reconnect_delay,
            link_up: Arc::clone(&self.link_up),
        };

        self.task = Some(self.handle.spawn(ctx.run()));
        self.current_connection = Some(connection_id);
        connection_id
    }

    /// Tear the connection down. Safe to call when not connected.
    ///
    /// Returns once the receive loop has stopped, so no sample is appended after
    /// this call.
    pub fn disconnect(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        task.abort();
        // Wait for the abort to land; the loop only appends between await points.
        self.wait_for(task);
        self.link_up.store(false, Ordering::SeqCst);

        if let Some(connection_id) = self.current_connection.take() {
            tracing::info!(connection_id, "telemetry connection closed");
            (self.events)(SupervisorEvent {
                connection_id,
                kind: ConnectionEvent::Disconnected,
            });
        }
    }

    /// Whether the transport currently reports an open connection.
    pub fn is_connected(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// Whether a receive loop is running (connected or still trying).
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Id of the active logical connection, if any.
    pub fn connection_id(&self) -> Option<u64> {
        self.current_connection
    }

    pub fn describe_source(&self) -> String {
        self.connector.describe()
    }

    fn reap(&mut self) {
        if let Some(task) = self.task.take() {
            self.wait_for(task);
        }
        self.current_connection = None;
    }

    fn wait_for(&self, task: JoinHandle<()>) {
        if Handle::try_current().is_ok() {
            // block_on panics inside a runtime; our worker thread still drives the task.
            while !task.is_finished() {
                std::thread::sleep(Duration::from_millis(1));
            }
        } else {
            let _ = self.handle.block_on(task);
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(runtime) = self.runtime.take() {
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            }
        }
    }
}

/// State moved into the receive task.
struct ReceiveLoop {
    connection_id: u64,
    connector: Arc<dyn Connector>,
    buffer: Arc<SampleBuffer>,
    stats: SharedStats,
    events: EventSink,
    reconnect_delay: Option<Duration>,
    link_up: Arc<AtomicBool>,
}

impl ReceiveLoop {
    fn emit(&self, kind: ConnectionEvent) {
        (self.events)(SupervisorEvent {
            connection_id: self.connection_id,
            kind,
        });
    }

    async fn run(self) {
        let mut first_sample_seen = false;

        loop {
            match self.connector.connect().await {
                Ok(mut messages) => {
                    self.stats.record_connection();
                    self.link_up.store(true, Ordering::SeqCst);
                    tracing::info!(connection_id = self.connection_id, "telemetry connected");
                    self.emit(ConnectionEvent::Connected);

                    while let Some(message) = messages.next().await {
                        let text = match message {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(connection_id = self.connection_id, "receive error: {e}");
                                self.emit(ConnectionEvent::Error(e.to_string()));
                                break;
                            }
                        };

                        self.stats.record_message();
                        match decode_message(&text, Utc::now()) {
                            Ok(samples) => {
                                self.buffer.append_all(&samples);
                                self.stats.record_samples(samples.len() as u64);
                                if !first_sample_seen && !samples.is_empty() {
                                    first_sample_seen = true;
                                    self.emit(ConnectionEvent::FirstSample);
                                }
                            }
                            Err(e) => {
                                self.stats.record_dropped_message();
                                tracing::warn!(
                                    connection_id = self.connection_id,
                                    "dropping malformed telemetry message: {e}"
                                );
                            }
                        }
                    }

                    self.link_up.store(false, Ordering::SeqCst);
                    tracing::info!(connection_id = self.connection_id, "telemetry stream ended");
                    self.emit(ConnectionEvent::Disconnected);
                }
                Err(e) => {
                    tracing::warn!(connection_id = self.connection_id, "connect failed: {e}");
                    self.emit(ConnectionEvent::Error(e.to_string()));
                }
            }

            match self.reconnect_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return,
            }
        }
    }
}
