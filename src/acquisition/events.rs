use crate::core::{AnalysisFailure, AnalysisReport};
use crate::stream::{Sample, SupervisorEvent};
use crossbeam_channel::Sender;
use uuid::Uuid;

/// Everything the state machine reacts to, in arrival order.
#[derive(Debug)]
pub enum AcquisitionEvent {
    /// Connectivity change from the stream supervisor
    Stream(SupervisorEvent),
    /// The analysis worker finished
    AnalysisFinished {
        session_id: Uuid,
        /// Snapshot the analysis ran on
        samples: Vec<Sample>,
        result: Result<AnalysisReport, AnalysisFailure>,
    },
    /// Cancel request from another thread
    Cancel,
}

/// Cancels the in-flight session from any thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<AcquisitionEvent>,
}

impl CancelHandle {
    pub(crate) fn new(tx: Sender<AcquisitionEvent>) -> Self {
        Self { tx }
    }

    /// Queue a cancel request. Returns false if the state machine is gone.
    pub fn cancel(&self) -> bool {
        self.tx.send(AcquisitionEvent::Cancel).is_ok()
    }
}
