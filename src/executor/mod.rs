//! Executor module — runs blocking native calls off the host thread.
//!
//! submit → worker queue → execute on worker thread → completion channel → host pump
//!
//! One worker thread per session, consuming a FIFO queue: calls against the
//! same native handle are serialized by construction, and complete in the
//! order they were submitted.

pub mod worker;

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::native::{MdSpi, NativeFactory};
use crate::queue::ConcurrentQueue;
use crate::types::request::{CallRequest, RequestKind};

use self::worker::WorkerState;

enum Job {
    Call(CallRequest),
    Stop,
}

// =============================================================================
// WORK DISPATCHER
// =============================================================================

/// Hands call requests to the session's worker thread.
pub struct WorkDispatcher {
    jobs: Arc<ConcurrentQueue<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkDispatcher {
    /// Spawn the worker thread. Completed requests are sent on `completions`.
    pub fn spawn(
        thread_name: &str,
        factory: Arc<dyn NativeFactory>,
        spi: Arc<dyn MdSpi>,
        completions: mpsc::UnboundedSender<CallRequest>,
    ) -> std::io::Result<Self> {
        let jobs: Arc<ConcurrentQueue<Job>> = Arc::new(ConcurrentQueue::new());
        let state = WorkerState::new(factory, spi);

        let thread = {
            let jobs = Arc::clone(&jobs);
            std::thread::Builder::new()
                .name(thread_name.to_string())
                .spawn(move || worker_loop(state, jobs, completions))?
        };

        Ok(Self {
            jobs,
            thread: Some(thread),
        })
    }

    /// Enqueue a request. Never blocks.
    pub fn submit(&self, call: CallRequest) {
        self.jobs.push(Job::Call(call));
    }

    /// Ask the worker to release the handle (if still held) and exit once the
    /// requests already queued have run. Does not wait.
    pub fn stop(&mut self) {
        if self.thread.take().is_some() {
            self.jobs.push(Job::Stop);
        }
    }
}

impl Drop for WorkDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// WORKER LOOP (dedicated OS thread)
// =============================================================================

fn worker_loop(
    mut state: WorkerState,
    jobs: Arc<ConcurrentQueue<Job>>,
    completions: mpsc::UnboundedSender<CallRequest>,
) {
    tracing::info!("[Worker] Loop started, waiting for calls...");

    loop {
        match jobs.pop() {
            Job::Call(call) => {
                let exiting = call.kind() == RequestKind::Exit;
                process_call(&mut state, call, &completions);
                if exiting {
                    break;
                }
            }
            Job::Stop => {
                state.release();
                break;
            }
        }
    }

    tracing::info!("[Worker] Loop ended");
}

/// Execute one call and hand it back to the host pump.
fn process_call(
    state: &mut WorkerState,
    mut call: CallRequest,
    completions: &mpsc::UnboundedSender<CallRequest>,
) {
    let kind = call.kind();
    call.result = state.execute(&call.request, call.request_id);

    let elapsed = call.submitted_at.elapsed();
    match &call.result.error {
        None => tracing::debug!(
            kind = %kind,
            request_id = ?call.request_id,
            "[Worker] {} completed in {:.1}ms",
            kind,
            elapsed.as_secs_f64() * 1000.0,
        ),
        Some(error) => tracing::warn!(
            kind = %kind,
            request_id = ?call.request_id,
            status = call.result.status,
            "[Worker] {} failed in {:.1}ms: {}",
            kind,
            elapsed.as_secs_f64() * 1000.0,
            error,
        ),
    }

    if let Err(returned) = completions.send(call) {
        tracing::warn!(
            kind = %returned.0.kind(),
            "[Worker] Host pump gone, continuation dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::sim::SimulatedGateway;
    use crate::spi::{NotificationChannel, NotificationProducer};
    use crate::types::request::{CallValue, Request};
    use std::sync::Mutex;
    use std::time::Duration;

    fn dispatcher(
        gateway: &SimulatedGateway,
    ) -> (WorkDispatcher, mpsc::UnboundedReceiver<CallRequest>) {
        let channel = Arc::new(NotificationChannel::new());
        let spi: Arc<dyn MdSpi> = Arc::new(NotificationProducer::new(channel));
        let (tx, rx) = mpsc::unbounded_channel();
        let d = WorkDispatcher::spawn("test-worker", Arc::new(gateway.clone()), spi, tx).unwrap();
        (d, rx)
    }

    fn call(request: Request, log: &Arc<Mutex<Vec<String>>>) -> CallRequest {
        let log = Arc::clone(log);
        let name = request.kind().to_string();
        CallRequest::new(
            request,
            None,
            Box::new(move |outcome| {
                let tag = match outcome {
                    Ok(CallValue::Text(s)) => format!("{}={}", name, s),
                    Ok(_) => name,
                    Err(e) => format!("{}!{}", name, e.status()),
                };
                log.lock().unwrap().push(tag);
            }),
        )
    }

    #[tokio::test]
    async fn test_completions_arrive_in_submission_order() {
        let gateway = SimulatedGateway::new().with_call_delay(Duration::from_millis(5));
        let (dispatcher, mut rx) = dispatcher(&gateway);
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.submit(call(
            Request::CreateSession {
                flow_dir: "./flow".to_string(),
            },
            &log,
        ));
        dispatcher.submit(call(Request::GetApiVersion, &log));
        dispatcher.submit(call(Request::GetTradingDay, &log));
        dispatcher.submit(call(Request::Exit, &log));

        for _ in 0..4 {
            let done = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            done.complete();
        }

        let log = log.lock().unwrap().clone();
        assert_eq!(log[0], "createFtdcMdApi");
        assert!(log[1].starts_with("getApiVersion=v6.3.15"));
        // Trading day needs Init first.
        assert_eq!(log[2], "getTradingDay!-1");
        assert_eq!(log[3], "exit");
        assert_eq!(gateway.max_concurrent_calls(), 1);
        assert_eq!(gateway.released_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_releases_handle() {
        let gateway = SimulatedGateway::new();
        let (mut dispatcher, mut rx) = dispatcher(&gateway);
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.submit(call(
            Request::CreateSession {
                flow_dir: "./flow".to_string(),
            },
            &log,
        ));
        dispatcher.stop();

        let done = rx.recv().await.unwrap();
        assert!(done.result.error.is_none());
        // Worker exits after Stop, closing the completion channel.
        assert!(rx.recv().await.is_none());
        assert_eq!(gateway.released_count(), 1);
    }

    #[test]
    fn test_send_to_closed_pump_does_not_panic() {
        let gateway = SimulatedGateway::new();
        let (dispatcher, rx) = dispatcher(&gateway);
        drop(rx);
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.submit(call(Request::GetApiVersion, &log));
        dispatcher.submit(call(Request::Exit, &log));
        std::thread::sleep(Duration::from_millis(50));
        assert!(log.lock().unwrap().is_empty());
    }
}
