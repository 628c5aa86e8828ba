use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::TraceBuffer;
use crate::error::Error;
use crate::span::SpanData;
use crate::stats::HealthStats;
use crate::transport::Transport;
use crate::wire::ApiVersion;

/// Messages flowing from producers into the writer thread.
#[derive(Debug)]
pub(crate) enum WriterMessage {
    Traces(Vec<SpanData>),
    Flush(SyncSender<Result<(), Error>>),
    Shutdown(SyncSender<Result<(), Error>>),
}

#[derive(Clone, Debug)]
pub(crate) struct WriterConfig {
    pub(crate) flush_interval: Duration,
    pub(crate) max_batch_spans: usize,
    pub(crate) max_buffered_spans: usize,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_max: Duration,
    pub(crate) api_version: ApiVersion,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            flush_interval: Duration::from_secs(2),
            max_batch_spans: 1000,
            max_buffered_spans: 10_000,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            api_version: ApiVersion::default(),
        }
    }
}

/// The writer thread's state: accumulated traces and the failure backoff.
struct Worker {
    config: WriterConfig,
    transport: Box<dyn Transport>,
    stats: Arc<HealthStats>,
    batch: Vec<Vec<SpanData>>,
    batch_spans: usize,
    consecutive_failures: u32,
    next_attempt: Option<Instant>,
}

impl Worker {
    fn new(config: WriterConfig, transport: Box<dyn Transport>, stats: Arc<HealthStats>) -> Self {
        Worker {
            config,
            transport,
            stats,
            batch: Vec::new(),
            batch_spans: 0,
            consecutive_failures: 0,
            next_attempt: None,
        }
    }

    fn run(mut self, receiver: Receiver<WriterMessage>, buffer: Arc<TraceBuffer>) {
        let mut last_flush = Instant::now();
        loop {
            let remaining = self
                .config
                .flush_interval
                .checked_sub(last_flush.elapsed())
                .unwrap_or(Duration::ZERO);
            match receiver.recv_timeout(remaining) {
                Ok(WriterMessage::Traces(spans)) => {
                    self.enqueue(spans);
                    if self.batch_spans >= self.config.max_batch_spans {
                        self.flush(false);
                        last_flush = Instant::now();
                    }
                }
                Ok(WriterMessage::Flush(ack)) => {
                    buffer.flush_all();
                    let stop = self.drain_pending(&receiver);
                    let result = self.flush(true);
                    last_flush = Instant::now();
                    let _ = ack.try_send(result);
                    if stop {
                        return;
                    }
                }
                Ok(WriterMessage::Shutdown(ack)) => {
                    buffer.flush_all();
                    self.drain_pending(&receiver);
                    let result = self.flush(true);
                    let _ = ack.try_send(result);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    buffer.flush_stale();
                    let stop = self.drain_pending(&receiver);
                    self.flush(false);
                    last_flush = Instant::now();
                    if stop {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush(true);
                    return;
                }
            }
        }
    }

    /// Pulls any trace messages already sitting in the channel so a timed or
    /// forced flush covers everything handed off before it. Returns true when
    /// a shutdown request was drained; the caller must exit its loop once the
    /// in-flight work is done, or the acked shutdown would leave the thread
    /// running and its join would never return.
    fn drain_pending(&mut self, receiver: &Receiver<WriterMessage>) -> bool {
        let mut shutdown_requested = false;
        while let Ok(message) = receiver.try_recv() {
            match message {
                WriterMessage::Traces(spans) => self.enqueue(spans),
                WriterMessage::Flush(ack) => {
                    let result = self.flush(true);
                    let _ = ack.try_send(result);
                }
                WriterMessage::Shutdown(ack) => {
                    // Shutdown raced a flush or timed drain.
                    let result = self.flush(true);
                    let _ = ack.try_send(result);
                    shutdown_requested = true;
                }
            }
        }
        shutdown_requested
    }

    fn enqueue(&mut self, spans: Vec<SpanData>) {
        self.batch_spans += spans.len();
        self.batch.push(spans);
        // Shed oldest traces first when the batch outgrows its span budget.
        while self.batch_spans > self.config.max_buffered_spans && self.batch.len() > 1 {
            let shed = self.batch.remove(0);
            self.batch_spans -= shed.len();
            self.stats
                .spans_dropped
                .fetch_add(shed.len() as u64, Ordering::Relaxed);
            self.stats.traces_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Encodes and sends the accumulated batch. While the backoff window from
    /// a previous failure is open, a timed flush keeps accumulating instead;
    /// `force` (user flush, shutdown) always attempts delivery. The batch is
    /// discarded either way, so a dead agent cannot grow memory without
    /// bound.
    fn flush(&mut self, force: bool) -> Result<(), Error> {
        if self.batch.is_empty() {
            return Ok(());
        }
        if !force {
            if let Some(next_attempt) = self.next_attempt {
                if Instant::now() < next_attempt {
                    return Ok(());
                }
            }
        }

        let batch = std::mem::take(&mut self.batch);
        let batch_spans = std::mem::take(&mut self.batch_spans);
        let trace_count = batch.len();

        let result = self
            .config
            .api_version
            .encode(&batch)
            .and_then(|payload| {
                self.transport
                    .send(&payload, trace_count)
                    .map_err(Error::from)
            });

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.next_attempt = None;
                self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .spans_dropped
                    .fetch_add(batch_spans as u64, Ordering::Relaxed);
                self.stats
                    .traces_dropped
                    .fetch_add(trace_count as u64, Ordering::Relaxed);
                let backoff = self
                    .config
                    .backoff_base
                    .saturating_mul(1u32 << self.consecutive_failures.min(16))
                    .min(self.config.backoff_max);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.next_attempt = Some(Instant::now() + backoff);
                tracing::warn!(
                    failures = self.consecutive_failures,
                    backoff_ms = backoff.as_millis() as u64,
                    "failed to deliver trace batch: {err}"
                );
                Err(err)
            }
        }
    }
}

/// Handle to the background writer thread. Owns the channel sender side and
/// joins the thread on shutdown.
#[derive(Debug)]
pub(crate) struct Writer {
    sender: SyncSender<WriterMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Writer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        config: WriterConfig,
        transport: Box<dyn Transport>,
        receiver: Receiver<WriterMessage>,
        sender: SyncSender<WriterMessage>,
        buffer: Arc<TraceBuffer>,
        stats: Arc<HealthStats>,
        flush_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        let worker = Worker::new(config, transport, stats);
        let handle = thread::Builder::new()
            .name("tracekit-writer".to_owned())
            .spawn(move || worker.run(receiver, buffer))
            .ok();
        if handle.is_none() {
            tracing::error!("failed to spawn writer thread; traces will be dropped");
        }
        Writer {
            sender,
            handle: Mutex::new(handle),
            is_shutdown: AtomicBool::new(false),
            flush_timeout,
            shutdown_timeout,
        }
    }

    /// Blocks until the worker has attempted delivery of everything buffered
    /// so far, or until the flush timeout elapses.
    pub(crate) fn force_flush(&self) -> Result<(), Error> {
        if self.is_shutdown.load(Ordering::Acquire) {
            return Err(Error::AlreadyShutdown);
        }
        let (ack, done) = mpsc::sync_channel(1);
        self.sender
            .send(WriterMessage::Flush(ack))
            .map_err(|_| Error::AlreadyShutdown)?;
        match done.recv_timeout(self.flush_timeout) {
            Ok(result) => result,
            Err(_) => Err(Error::FlushTimedOut(self.flush_timeout)),
        }
    }

    /// Stops the worker after one final delivery attempt. Idempotent; the
    /// second and later calls return `Ok` without doing anything.
    pub(crate) fn shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (ack, done) = mpsc::sync_channel(1);
        if self.sender.send(WriterMessage::Shutdown(ack)).is_err() {
            return Ok(());
        }
        match done.recv_timeout(self.shutdown_timeout) {
            Ok(result) => {
                if let Ok(mut handle) = self.handle.lock() {
                    if let Some(handle) = handle.take() {
                        let _ = handle.join();
                    }
                }
                result
            }
            // The worker is stuck in a send; leave the thread detached
            // rather than blocking the caller.
            Err(_) => Err(Error::ShutdownTimedOut(self.shutdown_timeout)),
        }
    }
}
