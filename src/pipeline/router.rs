//! Fans node outputs out to the downstream sinks.

use std::sync::Arc;
use std::time::Duration;

use crate::sink::OutputSink;
use crate::{EventCallback, MicArrayConfig, MicArrayError, MicArrayEvent, NodeOutput};

/// Delivers each tick's outputs to every sink.
///
/// Sinks are written concurrently. A failed write is retried with
/// exponential backoff and reported as [`MicArrayEvent::SinkError`]; after the
/// last attempt the output is dropped for that sink only.
pub struct OutputRouter {
    sinks: Vec<Arc<dyn OutputSink>>,
    event_callback: Option<EventCallback>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl OutputRouter {
    /// Creates a router using the retry settings from `config`.
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>, config: &MicArrayConfig) -> Self {
        Self {
            sinks,
            event_callback: None,
            retry_attempts: config.sink_retry_attempts.max(1),
            retry_delay: config.sink_retry_delay,
        }
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// Number of sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    fn emit_event(&self, event: MicArrayEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    async fn write_to_sink(&self, sink: &Arc<dyn OutputSink>, output: &NodeOutput) {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            match sink.write(output).await {
                Ok(()) => return,
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        sink = sink.name(),
                        attempt = attempts,
                        error = %e,
                        "sink write failed"
                    );
                    self.emit_event(MicArrayEvent::SinkError {
                        sink_name: sink.name().to_string(),
                        error: e.to_string(),
                    });

                    if attempts >= self.retry_attempts {
                        return;
                    }

                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Writes one output to all sinks concurrently.
    pub async fn write_output(&self, output: &NodeOutput) {
        let futures: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| self.write_to_sink(sink, output))
            .collect();

        futures::future::join_all(futures).await;
    }

    /// Writes a tick's outputs in node order.
    pub async fn write_tick(&self, outputs: &[NodeOutput]) {
        for output in outputs {
            self.write_output(output).await;
        }
    }

    /// Starts all sinks. Fails on the first sink that can't start.
    pub async fn start_sinks(&self) -> Result<(), MicArrayError> {
        for sink in &self.sinks {
            sink.on_start()
                .await
                .map_err(|e| MicArrayError::SinkStartFailed {
                    sink_name: sink.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Stops all sinks, reporting failures as events.
    pub async fn stop_sinks(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_stop().await {
                self.emit_event(MicArrayEvent::SinkError {
                    sink_name: sink.name().to_string(),
                    error: format!("Error during shutdown: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_callback, ChannelOutput, SinkError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestSink {
        name: String,
        written: Mutex<Vec<u32>>,
        fail_count: AtomicUsize,
    }

    impl TestSink {
        fn new(name: &str) -> Self {
            Self::failing(name, 0)
        }

        fn failing(name: &str, fail_times: usize) -> Self {
            Self {
                name: name.to_string(),
                written: Mutex::new(Vec::new()),
                fail_count: AtomicUsize::new(fail_times),
            }
        }

        fn written(&self) -> Vec<u32> {
            self.written.lock().clone()
        }
    }

    #[async_trait]
    impl OutputSink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&self, output: &NodeOutput) -> Result<(), SinkError> {
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::custom("intentional failure"));
            }
            self.written.lock().push(output.node_id);
            Ok(())
        }
    }

    fn output(node_id: u32) -> NodeOutput {
        NodeOutput {
            node_id,
            output: ChannelOutput::empty(),
        }
    }

    fn fast_config() -> MicArrayConfig {
        MicArrayConfig {
            sink_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_router_writes_to_all_sinks() {
        let sink1 = Arc::new(TestSink::new("sink1"));
        let sink2 = Arc::new(TestSink::new("sink2"));
        let router = OutputRouter::new(vec![sink1.clone(), sink2.clone()], &fast_config());

        router.write_tick(&[output(1), output(2)]).await;

        assert_eq!(sink1.written(), vec![1, 2]);
        assert_eq!(sink2.written(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_router_retries_on_failure() {
        let sink = Arc::new(TestSink::failing("sink", 2));
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let router = OutputRouter::new(vec![sink.clone()], &fast_config())
            .with_event_callback(event_callback(move |e| events_clone.lock().push(e)));

        router.write_output(&output(3)).await;

        assert_eq!(sink.written(), vec![3]);
        assert_eq!(events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_router_gives_up_after_attempts() {
        let failing = Arc::new(TestSink::failing("failing", 10));
        let healthy = Arc::new(TestSink::new("healthy"));
        let router = OutputRouter::new(vec![failing.clone(), healthy.clone()], &fast_config());

        router.write_output(&output(1)).await;

        assert!(failing.written().is_empty());
        assert_eq!(healthy.written(), vec![1]);
        // 3 attempts used
        assert_eq!(failing.fail_count.load(Ordering::SeqCst), 7);
    }
}
