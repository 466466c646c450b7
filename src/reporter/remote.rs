//! Asynchronous delivery of finished spans to a sender.

use super::Reporter;
use crate::metrics::Metrics;
use crate::sender::{Sender, SenderError};
use crate::span::SpanData;
use crossbeam_channel::{bounded, Receiver, Sender as CommandSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_CLOSE_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

// Deadline arithmetic in the timer thread overflows on unbounded intervals;
// a tick this far out never fires in practice.
const MAX_FLUSH_TICK: Duration = Duration::from_secs(60 * 60 * 24 * 30);

#[derive(Debug)]
enum Command {
    Append(Box<SpanData>),
    Flush,
    Close,
}

/// Reporter that queues spans and ships them from a background worker.
///
/// `report` performs one non-blocking enqueue onto a bounded command queue;
/// when the queue is full the span is counted as dropped and discarded. A
/// single worker thread drains the queue in order, appending spans to the
/// [`Sender`] and flushing it on demand. A timer thread enqueues a flush
/// every `flush_interval`.
pub struct RemoteReporter {
    command_queue: CommandSender<Command>,
    sender: Arc<dyn Sender>,
    metrics: Arc<Metrics>,
    close_enqueue_timeout: Duration,
    workers: Mutex<WorkerHandles>,
}

#[derive(Debug)]
struct WorkerHandles {
    queue_processor: Option<JoinHandle<()>>,
    flush_timer: Option<(CommandSender<()>, JoinHandle<()>)>,
    closed: bool,
}

impl RemoteReporter {
    /// Start building a reporter that ships spans through `sender`.
    pub fn builder(sender: impl Sender + 'static) -> RemoteReporterBuilder {
        RemoteReporterBuilder {
            sender: Arc::new(sender),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            close_enqueue_timeout: DEFAULT_CLOSE_ENQUEUE_TIMEOUT,
            metrics: None,
        }
    }

    /// Ask the worker to flush the sender's buffer; does not wait.
    ///
    /// The queue-depth gauge is refreshed here, so its cost is bounded by
    /// the flush cadence rather than the span rate.
    pub fn flush(&self) {
        self.metrics
            .reporter_queue_length
            .update(self.command_queue.len() as i64);
        let _ = self.command_queue.try_send(Command::Flush);
    }
}

impl Reporter for RemoteReporter {
    fn report(&self, span: SpanData) {
        match self.command_queue.try_send(Command::Append(Box::new(span))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.metrics.reporter_dropped.inc(1),
            // reporter already closed
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn close(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.closed {
            return;
        }
        workers.closed = true;

        match self
            .command_queue
            .send_timeout(Command::Close, self.close_enqueue_timeout)
        {
            Ok(()) => {
                if let Some(handle) = workers.queue_processor.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => warn!(
                "Unable to cleanly close RemoteReporter, command queue is full - probably the sender is stuck"
            ),
        }

        if let Some((shutdown, handle)) = workers.flush_timer.take() {
            let _ = shutdown.try_send(());
            let _ = handle.join();
        }

        match self.sender.close() {
            Ok(flushed) => {
                if flushed > 0 {
                    self.metrics.reporter_success.inc(flushed as i64);
                }
            }
            Err(err) => {
                self.metrics.reporter_failure.inc(err.dropped_count as i64);
                error!(error = %err, "Remote reporter error on close");
            }
        }
    }
}

impl std::fmt::Debug for RemoteReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReporter")
            .field("queue_len", &self.command_queue.len())
            .finish()
    }
}

/// Builder for [`RemoteReporter`].
pub struct RemoteReporterBuilder {
    sender: Arc<dyn Sender>,
    max_queue_size: usize,
    flush_interval: Duration,
    close_enqueue_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl RemoteReporterBuilder {
    /// Capacity of the command queue. Defaults to 100.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Cadence of timed flushes. Defaults to 1 second.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// How long `close` may wait to enqueue its sentinel before giving up.
    /// Defaults to 1 second.
    pub fn with_close_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.close_enqueue_timeout = timeout;
        self
    }

    /// Metrics sink for reporter accounting.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the reporter and start its worker and flush-timer threads.
    pub fn build(self) -> RemoteReporter {
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop()));
        let (command_tx, command_rx) = bounded(self.max_queue_size);

        let processor = QueueProcessor {
            receiver: command_rx,
            sender: self.sender.clone(),
            metrics: metrics.clone(),
        };
        let queue_processor = thread::Builder::new()
            .name("jaeger.RemoteReporter-QueueProcessor".to_string())
            .spawn(move || processor.run())
            .ok();

        let (timer_tx, timer_rx) = bounded::<()>(1);
        let timer_queue = command_tx.clone();
        let tick = self.flush_interval.min(MAX_FLUSH_TICK);
        let flush_timer = thread::Builder::new()
            .name("jaeger.RemoteReporter-FlushTimer".to_string())
            .spawn(move || loop {
                match timer_rx.recv_timeout(tick) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        // queue full: skip this tick, the next one retries
                        let _ = timer_queue.try_send(Command::Flush);
                    }
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            })
            .ok()
            .map(|handle| (timer_tx, handle));

        RemoteReporter {
            command_queue: command_tx,
            sender: self.sender,
            metrics,
            close_enqueue_timeout: self.close_enqueue_timeout,
            workers: Mutex::new(WorkerHandles {
                queue_processor,
                flush_timer,
                closed: false,
            }),
        }
    }
}

struct QueueProcessor {
    receiver: Receiver<Command>,
    sender: Arc<dyn Sender>,
    metrics: Arc<Metrics>,
}

impl QueueProcessor {
    fn run(self) {
        let mut command_failed_before = false;
        while let Ok(command) = self.receiver.recv() {
            let (name, result) = match command {
                Command::Close => break,
                Command::Append(span) => ("AppendCommand", self.sender.append(*span)),
                Command::Flush => {
                    let result = self.sender.flush();
                    self.metrics
                        .reporter_queue_length
                        .update(self.receiver.len() as i64);
                    ("FlushCommand", result)
                }
            };
            match result {
                Ok(flushed) => {
                    if flushed > 0 {
                        self.metrics.reporter_success.inc(flushed as i64);
                    }
                    if command_failed_before {
                        info!("{name} is working again!");
                        command_failed_before = false;
                    }
                }
                Err(err) => {
                    self.metrics.reporter_failure.inc(err.dropped_count as i64);
                    if !command_failed_before {
                        log_first_failure(name, &err);
                        command_failed_before = true;
                    }
                }
            }
        }
    }
}

fn log_first_failure(name: &str, err: &SenderError) {
    warn!(
        error = %err,
        "{name} execution failed! Repeated errors of this command will not be logged."
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetricsFactory;
    use crate::sender::InMemorySender;
    use crate::testing::span_data;

    const NEVER: Duration = Duration::from_secs(u64::MAX);

    fn reporter_with(
        sender: impl Sender + 'static,
        flush_interval: Duration,
        max_queue_size: usize,
    ) -> (RemoteReporter, InMemoryMetricsFactory) {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Arc::new(Metrics::new(&factory));
        let reporter = RemoteReporter::builder(sender)
            .with_flush_interval(flush_interval)
            .with_max_queue_size(max_queue_size)
            .with_metrics(metrics)
            .build();
        (reporter, factory)
    }

    #[test]
    fn spans_are_flushed_on_close() {
        let sender = InMemorySender::new();
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 500);

        for _ in 0..100 {
            reporter.report(span_data("op"));
        }
        reporter.close();

        assert_eq!(sender.appended().len(), 0);
        assert_eq!(sender.flushed().len(), 100);
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "ok")]),
            100
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "dropped")]),
            0
        );
    }

    #[test]
    fn timed_flush_delivers_spans() {
        let sender = InMemorySender::new();
        let (reporter, _factory) =
            reporter_with(sender.clone(), Duration::from_millis(20), 500);

        reporter.report(span_data("op"));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sender.flushed().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sender.flushed().len(), 1);
        reporter.close();
    }

    #[test]
    fn full_queue_drops_spans_without_blocking() {
        let sender = InMemorySender::new();
        // gate the sender so the worker cannot drain the queue
        sender.permit_append(0);
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 100);

        for _ in 0..200 {
            reporter.report(span_data("op"));
        }

        assert!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "dropped")]) >= 1
        );

        // unblock the worker so close can drain
        sender.permit_append(usize::MAX);
        reporter.close();
    }

    #[test]
    fn reporting_after_close_is_a_silent_drop() {
        let sender = InMemorySender::new();
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 100);
        reporter.close();

        reporter.report(span_data("op"));
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "dropped")]),
            0
        );
        assert_eq!(sender.received().len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let sender = InMemorySender::new();
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 100);
        reporter.report(span_data("op"));
        reporter.close();
        reporter.close();

        assert_eq!(sender.flushed().len(), 1);
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "ok")]),
            1
        );
    }

    #[test]
    fn flush_updates_queue_length_gauge() {
        let sender = InMemorySender::new();
        sender.permit_append(0);
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 100);

        for _ in 0..3 {
            reporter.report(span_data("op"));
        }
        assert_eq!(factory.gauge_value("jaeger_tracer_reporter_queue", &[]), 0);

        reporter.flush();
        assert!(factory.gauge_value("jaeger_tracer_reporter_queue", &[]) > 0);

        sender.permit_append(usize::MAX);
        reporter.close();
    }

    #[test]
    fn append_errors_count_dropped_spans() {
        struct FailingSender;

        impl Sender for FailingSender {
            fn append(&self, _span: SpanData) -> Result<usize, SenderError> {
                Err(SenderError::new("append refused", 5))
            }

            fn flush(&self) -> Result<usize, SenderError> {
                Ok(0)
            }

            fn close(&self) -> Result<usize, SenderError> {
                Ok(0)
            }
        }

        let (reporter, factory) = reporter_with(FailingSender, NEVER, 100);
        reporter.report(span_data("op"));
        reporter.close();

        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "err")]),
            5
        );
    }

    #[test]
    fn close_surfaces_sender_errors_in_metrics_only() {
        struct FailingCloseSender;

        impl Sender for FailingCloseSender {
            fn append(&self, _span: SpanData) -> Result<usize, SenderError> {
                Ok(0)
            }

            fn flush(&self) -> Result<usize, SenderError> {
                Ok(0)
            }

            fn close(&self) -> Result<usize, SenderError> {
                Err(SenderError::new("close refused", 2))
            }
        }

        let (reporter, factory) = reporter_with(FailingCloseSender, NEVER, 100);
        reporter.close();

        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "err")]),
            2
        );
    }

    #[test]
    fn autonomous_sender_flushes_count_toward_success() {
        // flushes itself every second append
        #[derive(Clone, Default)]
        struct BatchingSender {
            buffered: Arc<Mutex<usize>>,
            emitted: Arc<Mutex<usize>>,
        }

        impl Sender for BatchingSender {
            fn append(&self, _span: SpanData) -> Result<usize, SenderError> {
                let mut buffered = self.buffered.lock().unwrap_or_else(PoisonError::into_inner);
                *buffered += 1;
                if *buffered == 2 {
                    *self.emitted.lock().unwrap_or_else(PoisonError::into_inner) += 2;
                    *buffered = 0;
                    return Ok(2);
                }
                Ok(0)
            }

            fn flush(&self) -> Result<usize, SenderError> {
                let mut buffered = self.buffered.lock().unwrap_or_else(PoisonError::into_inner);
                let flushed = *buffered;
                *self.emitted.lock().unwrap_or_else(PoisonError::into_inner) += flushed;
                *buffered = 0;
                Ok(flushed)
            }

            fn close(&self) -> Result<usize, SenderError> {
                self.flush()
            }
        }

        let sender = BatchingSender::default();
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 100);

        for _ in 0..3 {
            reporter.report(span_data("op"));
        }
        reporter.close();

        assert_eq!(*sender.emitted.lock().unwrap(), 3);
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "ok")]),
            3
        );
    }

    #[test]
    fn worker_recovers_after_failing_streak() {
        // fails the second and third flush
        #[derive(Clone, Default)]
        struct FlakySender {
            inner: InMemorySender,
            flush_count: Arc<Mutex<usize>>,
        }

        impl Sender for FlakySender {
            fn append(&self, span: SpanData) -> Result<usize, SenderError> {
                self.inner.append(span)
            }

            fn flush(&self) -> Result<usize, SenderError> {
                let count = {
                    let mut count = self
                        .flush_count
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    *count += 1;
                    *count
                };
                let flushed = self.inner.flush()?;
                if count == 2 || count == 3 {
                    return Err(SenderError::new("flush refused", flushed));
                }
                Ok(flushed)
            }

            fn close(&self) -> Result<usize, SenderError> {
                self.inner.flush()
            }
        }

        let sender = FlakySender::default();
        let (reporter, factory) = reporter_with(sender.clone(), NEVER, 100);

        // flush 1 succeeds
        reporter.report(span_data("a"));
        reporter.flush();
        // flushes 2 and 3 fail, each losing one span
        reporter.report(span_data("b"));
        reporter.flush();
        reporter.report(span_data("c"));
        reporter.flush();
        // flush 4 succeeds again
        reporter.report(span_data("d"));
        reporter.flush();
        reporter.close();

        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "err")]),
            2
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "ok")]),
            2
        );
    }
}
