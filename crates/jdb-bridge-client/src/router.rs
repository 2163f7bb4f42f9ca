//! Response router: transport events in, classified records out.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use jdb_bridge_core::{AsyncRecord, Prompt, Record, ResultRecord, StreamRecord, TransportEvent};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// Consumer of routed output.
///
/// Every line is delivered, including blank ones that carry no record, so
/// the consumer can track activity.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// A stdout line and its classification.
    async fn on_stdout(&self, line: &str, record: Option<Record>);

    /// A stderr line and its classification.
    async fn on_stderr(&self, line: &str, record: Option<Record>);

    /// The process exited.
    async fn on_exit(&self, code: Option<i32>);
}

/// Classifies each inbound line and hands it to the handler, in order.
pub struct Router<H> {
    handler: Arc<H>,
}

impl<H> Router<H>
where
    H: InboundHandler + 'static,
{
    /// Create a router delivering to `handler`.
    #[must_use]
    pub const fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Classify a stdout line.
    ///
    /// Blank lines are advisory and yield no record.
    #[must_use]
    pub fn classify_stdout(line: &str) -> Option<Record> {
        if line.trim().is_empty() {
            return None;
        }
        if let Some(prompt) = Prompt::parse(line) {
            return Some(Record::Result(ResultRecord::from_prompt(prompt)));
        }
        if let Some(event) = AsyncRecord::classify(line) {
            return Some(Record::Async(event));
        }
        Some(Record::Stream(StreamRecord::console(line)))
    }

    /// Classify a stderr line.
    #[must_use]
    pub fn classify_stderr(line: &str) -> Option<Record> {
        if line.trim().is_empty() {
            return None;
        }
        Some(Record::Stream(StreamRecord::log(line)))
    }

    /// Deliver one event to the handler.
    pub async fn deliver(&self, event: TransportEvent) {
        match event {
            TransportEvent::Stdout(line) => {
                let record = Self::classify_stdout(&line);
                self.handler.on_stdout(&line, record).await;
            }
            TransportEvent::Stderr(line) => {
                let record = Self::classify_stderr(&line);
                self.handler.on_stderr(&line, record).await;
            }
            TransportEvent::Exited(code) => self.handler.on_exit(code).await,
        }
    }

    /// Run the dispatch loop on its own task.
    ///
    /// The loop ends when the event channel closes, after the exit event, or
    /// when `stop_rx` fires.
    #[must_use]
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        stop_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events, stop_rx).await })
    }

    async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        stop_rx: oneshot::Receiver<()>,
    ) {
        let mut stop_rx = stop_rx.fuse();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Transport event channel closed");
                        break;
                    };
                    let exited = matches!(event, TransportEvent::Exited(_));
                    self.deliver(event).await;
                    if exited {
                        break;
                    }
                }
                _ = &mut stop_rx => {
                    tracing::debug!("Dispatch loop stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use jdb_bridge_core::{AsyncClass, StopReason, StreamKind};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn on_stdout(&self, line: &str, record: Option<Record>) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("out:{line}:{}", record.is_some()));
        }

        async fn on_stderr(&self, line: &str, record: Option<Record>) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("err:{line}:{}", record.is_some()));
        }

        async fn on_exit(&self, code: Option<i32>) {
            self.seen.lock().unwrap().push(format!("exit:{code:?}"));
        }
    }

    type R = Router<Recorder>;

    #[test]
    fn test_classify_prompts() {
        let Some(Record::Result(result)) = R::classify_stdout(">") else {
            panic!("expected result record");
        };
        assert!(result.token.is_none());
        assert!(result.output.is_empty());

        let Some(Record::Result(result)) = R::classify_stdout("main[2] ") else {
            panic!("expected result record");
        };
        assert_eq!(result.prompt.thread.as_deref(), Some("main"));
        assert_eq!(result.prompt.frame, Some(2));
    }

    #[test]
    fn test_classify_events_and_text() {
        let Some(Record::Async(event)) =
            R::classify_stdout("Step completed: \"thread=main\", Foo.bar(), line=12 bci=4")
        else {
            panic!("expected async record");
        };
        assert_eq!(event.class, AsyncClass::Stopped(StopReason::Step));

        let Some(Record::Stream(text)) = R::classify_stdout(" x = 42") else {
            panic!("expected stream record");
        };
        assert_eq!(text.kind, StreamKind::Console);

        let Some(Record::Stream(text)) = R::classify_stderr("Input stream closed.") else {
            panic!("expected stream record");
        };
        assert_eq!(text.kind, StreamKind::Log);
    }

    #[test]
    fn test_blank_lines_are_advisory() {
        assert!(R::classify_stdout("").is_none());
        assert!(R::classify_stdout("   ").is_none());
        assert!(R::classify_stderr("").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order_and_stops_after_exit() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = oneshot::channel();

        tx.send(TransportEvent::stdout("one")).unwrap();
        tx.send(TransportEvent::stderr("two")).unwrap();
        tx.send(TransportEvent::stdout("")).unwrap();
        tx.send(TransportEvent::Exited(Some(0))).unwrap();
        tx.send(TransportEvent::stdout("late")).unwrap();

        Router::new(Arc::clone(&recorder))
            .spawn(rx, stop_rx)
            .await
            .unwrap();

        assert_eq!(
            recorder.seen(),
            vec!["out:one:true", "err:two:true", "out::false", "exit:Some(0)"]
        );
    }

    #[tokio::test]
    async fn test_stop_ends_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let (_tx, rx) = mpsc::unbounded_channel::<TransportEvent>();
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = Router::new(Arc::clone(&recorder)).spawn(rx, stop_rx);
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(recorder.seen().is_empty());
    }
}
