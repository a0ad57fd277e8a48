//! Correlates remote workflow processes with the results they deliver later.

use buildit_core::CorrelationId;
use buildit_core::workflow::{EventType, ProcessStartRequest, WorkflowEngine};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use crate::WorkflowError;

type Listener = Box<dyn FnOnce(Value) -> BoxFuture<'static, ()> + Send>;

/// A process to start, together with the listeners for its results.
pub struct WorkflowTask {
    correlation_id: CorrelationId,
    process_id: String,
    payload: Value,
    listeners: HashMap<EventType, Listener>,
}

impl WorkflowTask {
    pub fn new(
        correlation_id: impl Into<CorrelationId>,
        process_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            process_id: process_id.into(),
            payload,
            listeners: HashMap::new(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Listen for `event`, deserializing its payload into `T`.
    ///
    /// A payload that does not deserialize is logged and dropped. Registering
    /// the same event twice keeps the last listener.
    pub fn add_listener<T, F, Fut>(&mut self, event: EventType, listener: F) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let correlation_id = self.correlation_id.clone();
        self.add_raw_listener(event, move |payload| async move {
            match serde_json::from_value::<T>(payload) {
                Ok(value) => listener(value).await,
                Err(e) => error!(
                    correlation_id = %correlation_id,
                    event = %event,
                    error = %e,
                    "Malformed workflow event payload"
                ),
            }
        })
    }

    /// Listen for `event` and receive its payload as raw JSON.
    pub fn add_raw_listener<F, Fut>(&mut self, event: EventType, listener: F) -> &mut Self
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.listeners
            .insert(event, Box::new(move |payload| listener(payload).boxed()));
        self
    }
}

/// Result of delivering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No pending process or no listener for the event; the event was discarded.
    Unmatched,
}

struct Registration {
    /// Which `start_process` call made this registration.
    token: u64,
    listener: Listener,
}

struct CorrelatedProcess {
    process_id: String,
    started_at: DateTime<Utc>,
    listeners: HashMap<EventType, Registration>,
}

/// Pending processes keyed by correlation id.
///
/// Every listener runs at most once: it is removed under the lock and invoked
/// after the lock is released, on its own task so that dropping the
/// dispatching future cannot leave it half applied.
pub struct WorkflowCorrelator {
    engine: Arc<dyn WorkflowEngine>,
    processes: Mutex<HashMap<CorrelationId, CorrelatedProcess>>,
    next_token: AtomicU64,
}

impl WorkflowCorrelator {
    pub fn new(engine: Arc<dyn WorkflowEngine>) -> Self {
        Self {
            engine,
            processes: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Register the task's listeners and ask the engine to start its process.
    ///
    /// Listeners are in place before the engine is called. If the engine
    /// refuses, the listeners registered by this call are removed again.
    pub async fn start_process(&self, task: WorkflowTask) -> Result<(), WorkflowError> {
        let WorkflowTask {
            correlation_id,
            process_id,
            payload,
            listeners,
        } = task;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        if !listeners.is_empty() {
            let mut processes = self.processes.lock();
            let process = processes
                .entry(correlation_id.clone())
                .or_insert_with(|| CorrelatedProcess {
                    process_id: process_id.clone(),
                    started_at: Utc::now(),
                    listeners: HashMap::new(),
                });
            for (event, listener) in listeners {
                let previous = process
                    .listeners
                    .insert(event, Registration { token, listener });
                if previous.is_some() {
                    debug!(correlation_id = %correlation_id, event = %event, "Replaced workflow listener");
                }
            }
        }

        let request = ProcessStartRequest {
            correlation_id: correlation_id.clone(),
            process_id,
            payload,
        };
        match self.engine.start_process(&request).await {
            Ok(()) => {
                info!(correlation_id = %correlation_id, process_id = %request.process_id, "Workflow process started");
                Ok(())
            }
            Err(source) => {
                self.remove_registrations(&correlation_id, token);
                error!(
                    correlation_id = %correlation_id,
                    process_id = %request.process_id,
                    error = %source,
                    "Failed to start workflow process"
                );
                Err(WorkflowError::Start {
                    correlation_id,
                    source,
                })
            }
        }
    }

    /// Deliver an event to the listener waiting for it.
    pub async fn dispatch(
        &self,
        correlation_id: &CorrelationId,
        event: EventType,
        payload: Value,
    ) -> DispatchOutcome {
        let registration = {
            let mut processes = self.processes.lock();
            let (registration, drained) = match processes.get_mut(correlation_id) {
                Some(process) => {
                    let registration = process.listeners.remove(&event);
                    (registration, process.listeners.is_empty())
                }
                None => (None, false),
            };
            if drained {
                if let Some(process) = processes.remove(correlation_id) {
                    debug!(
                        correlation_id = %correlation_id,
                        process_id = %process.process_id,
                        "Workflow process has no listeners left"
                    );
                }
            }
            registration
        };

        match registration {
            Some(registration) => {
                debug!(correlation_id = %correlation_id, event = %event, "Dispatching workflow event");
                let listener = tokio::spawn((registration.listener)(payload));
                if let Err(e) = listener.await {
                    error!(correlation_id = %correlation_id, event = %event, error = %e, "Workflow listener failed");
                }
                DispatchOutcome::Delivered
            }
            None => {
                warn!(
                    correlation_id = %correlation_id,
                    event = %event,
                    "No listener for workflow event, discarding"
                );
                DispatchOutcome::Unmatched
            }
        }
    }

    /// Deliver an event named as it arrives on the wire.
    pub async fn dispatch_named(
        &self,
        correlation_id: &CorrelationId,
        event_name: &str,
        payload: Value,
    ) -> DispatchOutcome {
        match event_name.parse::<EventType>() {
            Ok(event) => self.dispatch(correlation_id, event, payload).await,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Discarding workflow event");
                DispatchOutcome::Unmatched
            }
        }
    }

    /// Forget a pending process and all its listeners.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        match self.processes.lock().remove(correlation_id) {
            Some(process) => {
                info!(
                    correlation_id = %correlation_id,
                    process_id = %process.process_id,
                    started_at = %process.started_at,
                    pending = process.listeners.len(),
                    "Dropped workflow process"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.processes.lock().contains_key(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.processes.lock().len()
    }

    fn remove_registrations(&self, correlation_id: &CorrelationId, token: u64) {
        let mut processes = self.processes.lock();
        let drained = match processes.get_mut(correlation_id) {
            Some(process) => {
                process.listeners.retain(|_, r| r.token != token);
                process.listeners.is_empty()
            }
            None => false,
        };
        if drained {
            processes.remove(correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use buildit_core::workflow::EngineError;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockEngine {
        fail: bool,
        started: Mutex<Vec<ProcessStartRequest>>,
    }

    #[async_trait]
    impl WorkflowEngine for MockEngine {
        async fn start_process(&self, request: &ProcessStartRequest) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.started.lock().push(request.clone());
            Ok(())
        }
    }

    #[derive(Debug, Deserialize)]
    struct Progress {
        percent: u32,
    }

    fn counting_task(id: &str, event: EventType, counter: &Arc<AtomicUsize>) -> WorkflowTask {
        let mut task = WorkflowTask::new(id, "release", serde_json::json!({}));
        let counter = counter.clone();
        task.add_raw_listener(event, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task
    }

    #[tokio::test]
    async fn test_event_delivered_at_most_once() {
        let engine = Arc::new(MockEngine::default());
        let correlator = WorkflowCorrelator::new(engine.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &calls))
            .await
            .unwrap();
        assert_eq!(engine.started.lock()[0].process_id, "release");
        assert!(correlator.is_pending(&"c-1".into()));

        let id = CorrelationId::from("c-1");
        let first = correlator
            .dispatch(&id, EventType::ImportSuccess, Value::Null)
            .await;
        let second = correlator
            .dispatch(&id, EventType::ImportSuccess, Value::Null)
            .await;

        assert_eq!(first, DispatchOutcome::Delivered);
        assert_eq!(second, DispatchOutcome::Unmatched);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!correlator.is_pending(&id));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_leaves_other_listeners() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let success_calls = Arc::new(AtomicUsize::new(0));
        let error_calls = Arc::new(AtomicUsize::new(0));

        let mut task = counting_task("c-1", EventType::ImportSuccess, &success_calls);
        let counter = error_calls.clone();
        task.add_raw_listener(EventType::ImportError, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        correlator.start_process(task).await.unwrap();

        let id = CorrelationId::from("c-1");
        let first = correlator
            .dispatch(&id, EventType::ImportSuccess, Value::Null)
            .await;
        let second = correlator
            .dispatch(&id, EventType::ImportSuccess, Value::Null)
            .await;

        assert_eq!(first, DispatchOutcome::Delivered);
        assert_eq!(second, DispatchOutcome::Unmatched);
        assert_eq!(success_calls.load(Ordering::SeqCst), 1);
        assert_eq!(error_calls.load(Ordering::SeqCst), 0);
        assert!(correlator.is_pending(&id));
    }

    #[tokio::test]
    async fn test_listener_finishes_when_dispatch_is_dropped() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut task = WorkflowTask::new("c-1", "release", Value::Null);
        let counter = calls.clone();
        task.add_raw_listener(EventType::ImportSuccess, move |_| async move {
            let _ = release_rx.await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        correlator.start_process(task).await.unwrap();

        // The caller gives up while the listener is still running.
        let id = CorrelationId::from("c-1");
        let dispatch = correlator.dispatch(&id, EventType::ImportSuccess, Value::Null);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), dispatch)
                .await
                .is_err()
        );
        assert!(!correlator.is_pending(&id));

        release_tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_discarded() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &calls))
            .await
            .unwrap();

        let outcome = correlator
            .dispatch(&"other".into(), EventType::ImportSuccess, Value::Null)
            .await;

        assert_eq!(outcome, DispatchOutcome::Unmatched);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_name_is_discarded() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &calls))
            .await
            .unwrap();

        let outcome = correlator
            .dispatch_named(&"c-1".into(), "NOT_AN_EVENT", Value::Null)
            .await;

        assert_eq!(outcome, DispatchOutcome::Unmatched);
        assert!(correlator.is_pending(&"c-1".into()));
    }

    #[tokio::test]
    async fn test_failed_start_removes_listeners() {
        let engine = Arc::new(MockEngine {
            fail: true,
            ..Default::default()
        });
        let correlator = WorkflowCorrelator::new(engine);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &calls))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Start { ref correlation_id, .. } if correlation_id.as_str() == "c-1"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_merges_listeners_last_wins() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let error_calls = Arc::new(AtomicUsize::new(0));

        correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &first))
            .await
            .unwrap();
        correlator
            .start_process(counting_task("c-1", EventType::ImportError, &error_calls))
            .await
            .unwrap();
        correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &second))
            .await
            .unwrap();

        let id = CorrelationId::from("c-1");
        correlator
            .dispatch(&id, EventType::ImportSuccess, Value::Null)
            .await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // The error listener from the second start is still registered.
        assert!(correlator.is_pending(&id));
        correlator.dispatch(&id, EventType::ImportError, Value::Null).await;
        assert_eq!(error_calls.load(Ordering::SeqCst), 1);
        assert!(!correlator.is_pending(&id));
    }

    #[tokio::test]
    async fn test_typed_listener_payloads() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in ["good", "bad"] {
            let mut task = WorkflowTask::new(id, "release", Value::Null);
            let seen = seen.clone();
            task.add_listener(EventType::ProcessProgress, move |progress: Progress| async move {
                seen.lock().push(progress.percent);
            });
            correlator.start_process(task).await.unwrap();
        }

        let good = correlator
            .dispatch(
                &"good".into(),
                EventType::ProcessProgress,
                serde_json::json!({ "percent": 40 }),
            )
            .await;
        let bad = correlator
            .dispatch(
                &"bad".into(),
                EventType::ProcessProgress,
                serde_json::json!({ "percent": "lots" }),
            )
            .await;

        // A malformed payload still consumes the registration.
        assert_eq!(good, DispatchOutcome::Delivered);
        assert_eq!(bad, DispatchOutcome::Delivered);
        assert_eq!(*seen.lock(), vec![40]);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandon() {
        let correlator = WorkflowCorrelator::new(Arc::new(MockEngine::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        correlator
            .start_process(counting_task("c-1", EventType::ImportSuccess, &calls))
            .await
            .unwrap();

        let id = CorrelationId::from("c-1");
        assert!(correlator.abandon(&id));
        assert!(!correlator.abandon(&id));
        assert_eq!(
            correlator
                .dispatch(&id, EventType::ImportSuccess, Value::Null)
                .await,
            DispatchOutcome::Unmatched
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
