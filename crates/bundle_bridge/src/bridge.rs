//! Half-duplex stream bridge between intake and bundling output
//!
//! The sink side accepts files through a bounded channel and registers them
//! with the run state from a dedicated intake task. The source side carries
//! the single outcome of the bundling run: one file followed by the end of the
//! stream, or one error.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use anyhow::{Result, anyhow};
use futures::Stream;
use log::{debug, trace};
use tokio::sync::mpsc;

use crate::{
    run_state::{BridgePhase, RunState},
    types::File,
};

/// Number of intake items that may be in flight before senders wait
pub const INTAKE_CAPACITY: usize = 16;

/// Intake side of the bridge
///
/// Dropping the sink or calling [`FileSink::finish`] signals end of intake.
#[derive(Debug)]
pub struct FileSink {
    tx: mpsc::Sender<File>,
}

impl FileSink {
    /// Push a file into the bridge, waiting while the buffer is full
    pub async fn send(&self, file: File) -> Result<()> {
        let path = file.path.clone();
        self.tx
            .send(file)
            .await
            .map_err(|_| anyhow!("Cannot accept {path}: bundling run is gone"))
    }

    /// Signal that no more files will be sent
    pub fn finish(self) {
        debug!("Intake finished by producer");
    }
}

/// Output side of the bridge
///
/// Yields exactly one item: the bundled file or the bundling error.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<Result<File>>,
}

impl ResultStream {
    /// Wait for the single outcome of the run
    pub async fn into_file(mut self) -> Result<File> {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| Err(anyhow!("Bundling run ended without producing output")))
    }
}

impl Stream for ResultStream {
    type Item = Result<File>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Push target used by the orchestrator to emit the run's outcome
#[derive(Debug)]
pub(crate) struct ResultEmitter {
    tx: mpsc::Sender<Result<File>>,
    state: Arc<RunState>,
}

impl ResultEmitter {
    /// Emit the outcome and close the bridge
    pub(crate) async fn emit(self, outcome: Result<File>) {
        match &outcome {
            Ok(file) => debug!("Pushing result file {}", file.path),
            Err(err) => debug!("Pushing bundling error: {err:#}"),
        }
        if self.tx.send(outcome).await.is_err() {
            debug!("Result stream dropped before the outcome was delivered");
        }
        self.state.close();
    }
}

/// Both ends of one bundling run
#[derive(Debug)]
pub struct StreamBridge {
    sink: FileSink,
    source: ResultStream,
    state: Arc<RunState>,
}

impl StreamBridge {
    /// Create the channels and spawn the intake task on the current runtime
    pub(crate) fn open(state: Arc<RunState>) -> (Self, ResultEmitter) {
        let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel(1);

        tokio::spawn(drive_intake(intake_rx, Arc::clone(&state)));

        let bridge = Self {
            sink: FileSink { tx: intake_tx },
            source: ResultStream { rx: result_rx },
            state: Arc::clone(&state),
        };
        let emitter = ResultEmitter {
            tx: result_tx,
            state,
        };
        (bridge, emitter)
    }

    /// Push a file into the intake side
    pub async fn send(&self, file: File) -> Result<()> {
        self.sink.send(file).await
    }

    /// Current lifecycle phase of the run
    pub fn phase(&self) -> BridgePhase {
        self.state.phase()
    }

    /// Separate the intake and output halves
    pub fn split(self) -> (FileSink, ResultStream) {
        (self.sink, self.source)
    }

    /// End intake and wait for the single outcome
    pub async fn finish(self) -> Result<File> {
        let (sink, source) = self.split();
        sink.finish();
        source.into_file().await
    }
}

/// Register intake in arrival order, then mark the run ended
async fn drive_intake(mut rx: mpsc::Receiver<File>, state: Arc<RunState>) {
    while let Some(file) = rx.recv().await {
        if !state.register(file) {
            trace!("Intake item ignored after close");
        }
    }
    state.mark_ended();
}
