//! Session — one native market-data session and its host pump.
//!
//! ```text
//!  host ──submit──▶ WorkDispatcher ──worker thread──▶ NativeSession
//!   ▲                     │ completions (mpsc)              │ MdSpi callbacks
//!   │                     ▼                                 ▼
//!   └────────────── host pump ◀──── wakeup ──── NotificationChannel
//! ```
//!
//! The host pump is a single tokio task. Every continuation and every event
//! handler runs on it, one at a time, so host code never observes two of
//! them concurrently. Submitting never blocks: it validates, checks the
//! lifecycle state, enqueues, and returns. A panicking continuation or
//! handler is logged and the pump keeps running.

pub mod client;
pub mod state;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::bridge::callbacks::{Handler, HandlerTable};
use crate::error::{BridgeError, Result};
use crate::executor::worker::panic_message;
use crate::executor::WorkDispatcher;
use crate::native::{MdSpi, NativeFactory};
use crate::spi::{NotificationChannel, NotificationProducer};
use crate::types::config::SessionConfig;
use crate::types::fields::{FensUserInfoField, ReqUserLoginField, UserLogoutField};
use crate::types::notification::{Notification, ResponseKind};
use crate::types::request::{CallRequest, CallValue, Continuation, Request, RequestKind};

pub use self::state::SessionState;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between the submitting side and the host pump.
struct Shared {
    id: u64,
    verbose: bool,
    state: Mutex<SessionState>,
    handlers: HandlerTable,
    in_flight: AtomicUsize,
    detached: AtomicBool,
    detached_signal: Notify,
}

struct SessionInner {
    shared: Arc<Shared>,
    channel: Arc<NotificationChannel>,
    dispatcher: WorkDispatcher,
    config: SessionConfig,
}

/// Handle to one market-data session. Clones refer to the same session.
///
/// Calls against the native handle are serialized internally: each one runs
/// on the session's single worker thread, in submission order, so a caller
/// may submit the next call before the previous continuation has run.
///
/// Handlers that capture a `Session` keep it alive until `exit` clears the
/// handler table.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session and spawn its worker thread and host pump.
    ///
    /// Must be called from within a tokio runtime; the pump is spawned on it.
    pub fn new(factory: Arc<dyn NativeFactory>, config: SessionConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            BridgeError::Configuration("a session must be created inside a tokio runtime".into())
        })?;

        let channel = Arc::new(NotificationChannel::new());
        let spi: Arc<dyn MdSpi> = Arc::new(NotificationProducer::new(Arc::clone(&channel)));
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let dispatcher =
            WorkDispatcher::spawn(config.worker_thread_name(), factory, spi, completions_tx)
                .map_err(|e| {
                    BridgeError::Configuration(format!("failed to spawn worker thread: {}", e))
                })?;

        let shared = Arc::new(Shared {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            verbose: config.verbose(),
            state: Mutex::new(SessionState::Uninitialized),
            handlers: HandlerTable::new(),
            in_flight: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
            detached_signal: Notify::new(),
        });

        runtime.spawn(run_pump(
            Arc::clone(&shared),
            Arc::clone(&channel),
            completions_rx,
        ));

        info!(session = shared.id, "Session created");

        Ok(Self {
            inner: Arc::new(SessionInner {
                shared,
                channel,
                dispatcher,
                config,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.shared.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.shared.state.lock()
    }

    /// Calls submitted whose continuation has not run yet.
    pub fn in_flight(&self) -> usize {
        self.inner.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Notifications published but not yet drained by the pump.
    pub fn pending_notifications(&self) -> usize {
        self.inner.channel.pending()
    }

    /// True once the host pump has returned.
    pub fn is_detached(&self) -> bool {
        self.inner.shared.detached.load(Ordering::SeqCst)
    }

    /// Resolves once the host pump has returned.
    pub async fn detached(&self) {
        let shared = &self.inner.shared;
        loop {
            let notified = shared.detached_signal.notified();
            if shared.detached.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    /// Validate and enqueue `request`. The continuation runs on the host pump
    /// exactly once, with either the returned value or the failure.
    ///
    /// Argument and lifecycle errors are returned here and the request is
    /// never enqueued.
    pub fn submit(
        &self,
        request: Request,
        request_id: Option<i32>,
        continuation: Continuation,
    ) -> Result<()> {
        request.validate()?;
        let kind = request.kind();
        let shared = &self.inner.shared;

        // Held across the push so an Exit can never overtake an accepted call.
        let mut state = shared.state.lock();
        if !state.accepts(kind) {
            return Err(BridgeError::InvalidState {
                operation: kind.as_str(),
                state: *state,
            });
        }
        if kind == RequestKind::Exit {
            info!(session = shared.id, from = %state.as_str(), "Session exiting");
            *state = SessionState::Exiting;
        }

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        debug!(session = shared.id, kind = %kind, request_id = ?request_id, "Call submitted");
        self.inner
            .dispatcher
            .submit(CallRequest::new(request, request_id, continuation));
        Ok(())
    }

    fn call<F>(&self, request: Request, request_id: Option<i32>, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.submit(request, request_id, Box::new(done))
    }

    /// Construct the native handle. Its callback sink is this session.
    pub fn create_session<F>(&self, flow_dir: &str, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        let request = Request::CreateSession {
            flow_dir: flow_dir.to_string(),
        };
        self.call(request, None, done)
    }

    pub fn get_api_version<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::GetApiVersion, None, done)
    }

    /// Start the native I/O thread. `FrontConnected` follows once a front answers.
    pub fn init<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::Init, None, done)
    }

    pub fn get_trading_day<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::GetTradingDay, None, done)
    }

    pub fn register_front<F>(&self, address: &str, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        let request = Request::RegisterFront {
            address: address.to_string(),
        };
        self.call(request, None, done)
    }

    pub fn register_name_server<F>(&self, address: &str, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        let request = Request::RegisterNameServer {
            address: address.to_string(),
        };
        self.call(request, None, done)
    }

    /// User info for name-server login. Must precede `init`.
    pub fn register_fens_user_info<F>(&self, field: FensUserInfoField, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::RegisterFensUserInfo { field }, None, done)
    }

    pub fn subscribe_market_data<F>(&self, instrument_ids: Vec<String>, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::SubscribeMarketData { instrument_ids }, None, done)
    }

    pub fn unsubscribe_market_data<F>(&self, instrument_ids: Vec<String>, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::UnsubscribeMarketData { instrument_ids }, None, done)
    }

    pub fn subscribe_for_quote_rsp<F>(&self, instrument_ids: Vec<String>, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::SubscribeForQuoteRsp { instrument_ids }, None, done)
    }

    pub fn unsubscribe_for_quote_rsp<F>(&self, instrument_ids: Vec<String>, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::UnsubscribeForQuoteRsp { instrument_ids }, None, done)
    }

    /// Request a login. The acknowledgement arrives as `RspUserLogin` carrying
    /// the same `request_id`.
    pub fn req_user_login<F>(&self, field: ReqUserLoginField, request_id: i32, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::UserLogin { field }, Some(request_id), done)
    }

    pub fn req_user_logout<F>(&self, field: UserLogoutField, request_id: i32, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::UserLogout { field }, Some(request_id), done)
    }

    /// Release the native handle and detach the host pump.
    ///
    /// Succeeds once; any later call, `exit` included, fails with a
    /// lifecycle error. Notifications not yet drained are discarded.
    pub fn exit<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(Result<CallValue>) + Send + 'static,
    {
        self.call(Request::Exit, None, done)
    }

    // =========================================================================
    // EVENT HANDLERS
    // =========================================================================

    /// Register the handler for `kind`, replacing any previous one.
    /// Returns true if a handler was replaced.
    pub fn on<F>(&self, kind: ResponseKind, handler: F) -> bool
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.inner.shared.handlers.register(kind, handler)
    }

    /// Register by event name (`"FrontConnected"`, `"RtnDepthMarketData"`, ...).
    pub fn on_event<F>(&self, event_name: &str, handler: F) -> Result<bool>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let kind: ResponseKind = event_name.parse()?;
        Ok(self.on(kind, handler))
    }

    pub fn off(&self, kind: ResponseKind) -> bool {
        self.inner.shared.handlers.unregister(kind)
    }

    pub fn has_handler(&self, kind: ResponseKind) -> bool {
        self.inner.shared.handlers.has_handler(kind)
    }
}

// =============================================================================
// HOST PUMP
// =============================================================================

async fn run_pump(
    shared: Arc<Shared>,
    channel: Arc<NotificationChannel>,
    mut completions: mpsc::UnboundedReceiver<CallRequest>,
) {
    debug!(session = shared.id, "Host pump started");

    loop {
        tokio::select! {
            biased;

            done = completions.recv() => match done {
                Some(call) => shared.complete(&channel, call),
                // Worker gone: the session was dropped without exit.
                None => break,
            },

            _ = channel.wait() => shared.drain(&channel),
        }

        if *shared.state.lock() == SessionState::Closed
            && shared.in_flight.load(Ordering::SeqCst) == 0
        {
            break;
        }
    }

    let discarded = channel.close();
    shared.handlers.clear();
    shared.detached.store(true, Ordering::SeqCst);
    shared.detached_signal.notify_waiters();

    info!(
        session = shared.id,
        discarded,
        published = channel.published_count(),
        "Host pump detached"
    );
}

impl Shared {
    /// Apply the call's state transition, then run its continuation.
    fn complete(&self, channel: &NotificationChannel, call: CallRequest) {
        let kind = call.kind();

        {
            let mut state = self.state.lock();
            // Exit closes the session even when the release reported a failure.
            let next = if call.result.error.is_none() || kind == RequestKind::Exit {
                state.after_call(kind)
            } else {
                *state
            };
            if next != *state {
                info!(session = self.id, from = %state.as_str(), to = %next, "Session state changed");
                *state = next;
            }
        }

        if kind == RequestKind::Exit {
            let discarded = channel.close();
            if discarded > 0 {
                debug!(session = self.id, discarded, "Pending notifications discarded on exit");
            }
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call.complete())) {
            warn!(
                session = self.id,
                kind = %kind,
                "Continuation panicked: {}",
                panic_message(payload.as_ref())
            );
        }

        if kind == RequestKind::Exit {
            self.handlers.clear();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drain the channel until empty, dispatching every notification.
    fn drain(&self, channel: &NotificationChannel) {
        let count = channel.drain(|notification| {
            let kind = notification.kind;
            {
                let mut state = self.state.lock();
                let next = state.after_event(kind);
                if next != *state {
                    info!(session = self.id, from = %state.as_str(), to = %next, "Session state changed");
                    *state = next;
                }
            }

            if self.verbose {
                info!(
                    session = self.id,
                    kind = %kind,
                    request_id = ?notification.request_id,
                    is_final = notification.is_final,
                    "Notification"
                );
            }
            if notification.is_error() {
                if let Some(error) = &notification.error {
                    warn!(
                        session = self.id,
                        kind = %kind,
                        error_id = error.error_id,
                        "Native error: {}",
                        error.error_msg
                    );
                }
            }

            match catch_unwind(AssertUnwindSafe(|| self.handlers.dispatch(notification))) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(session = self.id, kind = %kind, "No handler, notification discarded")
                }
                Err(payload) => warn!(
                    session = self.id,
                    kind = %kind,
                    "Handler panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        });

        if count > 0 {
            debug!(session = self.id, count, "Drained notifications");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::sim::SimulatedGateway;
    use crate::types::fields::RspInfoField;
    use crate::types::notification::NotificationData;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    const FRONT: &str = "tcp://127.0.0.1:17001";

    fn session(gateway: &SimulatedGateway) -> Session {
        Session::new(Arc::new(gateway.clone()), SessionConfig::default()).unwrap()
    }

    fn slot() -> (
        impl FnOnce(Result<CallValue>) + Send + 'static,
        oneshot::Receiver<Result<CallValue>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            move |outcome| {
                let _ = tx.send(outcome);
            },
            rx,
        )
    }

    async fn outcome(rx: oneshot::Receiver<Result<CallValue>>) -> Result<CallValue> {
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("continuation timed out")
            .expect("continuation dropped")
    }

    fn record(session: &Session, kind: ResponseKind) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        session.on(kind, move |n| {
            let _ = tx.send(n);
        });
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("notification timed out")
            .expect("handler dropped")
    }

    async fn create(session: &Session) {
        let (done, rx) = slot();
        session.create_session("./flow", done).unwrap();
        outcome(rx).await.unwrap();
    }

    async fn connect(session: &Session) {
        create(session).await;
        let (done, rx) = slot();
        session.register_front(FRONT, done).unwrap();
        outcome(rx).await.unwrap();
        let (done, rx) = slot();
        session.init(done).unwrap();
        outcome(rx).await.unwrap();
    }

    async fn exit(session: &Session) {
        let (done, rx) = slot();
        session.exit(done).unwrap();
        outcome(rx).await.unwrap();
    }

    fn login_field() -> ReqUserLoginField {
        ReqUserLoginField {
            broker_id: "9999".to_string(),
            user_id: "000001".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_and_login() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut connected = record(&session, ResponseKind::FrontConnected);
        let mut logins = record(&session, ResponseKind::RspUserLogin);

        assert_eq!(session.state(), SessionState::Uninitialized);
        connect(&session).await;

        let n = next(&mut connected).await;
        assert!(n.data.is_none());
        assert_eq!(session.state(), SessionState::Active);

        let (done, rx) = slot();
        session.req_user_login(login_field(), 1, done).unwrap();
        assert_eq!(outcome(rx).await, Ok(CallValue::Status(0)));

        let n = next(&mut logins).await;
        assert_eq!(n.request_id, Some(1));
        assert!(n.is_final);
        assert!(n.error.is_none());
        match n.data {
            Some(NotificationData::UserLogin(field)) => assert_eq!(field.user_id, "000001"),
            other => panic!("unexpected payload: {:?}", other),
        }

        exit(&session).await;
    }

    #[tokio::test]
    async fn test_subscribe_before_init_fails_without_notification() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut acks = record(&session, ResponseKind::RspSubMarketData);
        create(&session).await;
        assert_eq!(session.state(), SessionState::Created);

        let (done, rx) = slot();
        session
            .subscribe_market_data(vec!["IF2024".to_string()], done)
            .unwrap();
        match outcome(rx).await {
            Err(BridgeError::CallFailed { message, .. }) => {
                assert!(message.contains("not initialized"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(acks.try_recv().is_err());
        assert!(!gateway
            .calls()
            .contains(&"subscribe_market_data".to_string()));
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_back_to_back_notifications_delivered_in_order() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut disconnects = record(&session, ResponseKind::FrontDisconnected);
        create(&session).await;

        assert!(gateway.emit_batch(|spi| {
            spi.on_front_disconnected(0x1001);
            spi.on_front_disconnected(0x2001);
        }));

        let first = next(&mut disconnects).await;
        let second = next(&mut disconnects).await;
        assert_eq!(first.data, Some(NotificationData::Reason(0x1001)));
        assert_eq!(second.data, Some(NotificationData::Reason(0x2001)));
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_exit_twice() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        connect(&session).await;

        exit(&session).await;
        assert_eq!(session.state(), SessionState::Closed);

        let (done, _rx) = slot();
        let err = session.exit(done).unwrap_err();
        assert!(err.is_lifecycle());
        assert_eq!(gateway.released_count(), 1);

        tokio::time::timeout(Duration::from_secs(2), session.detached())
            .await
            .unwrap();
        assert!(session.is_detached());
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_calls_after_close_fail_fast() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        create(&session).await;
        exit(&session).await;

        let (done, _rx) = slot();
        match session.get_api_version(done) {
            Err(BridgeError::InvalidState { operation, state }) => {
                assert_eq!(operation, "getApiVersion");
                assert_eq!(state, SessionState::Closed);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!gateway.calls().contains(&"api_version".to_string()));
    }

    #[tokio::test]
    async fn test_pipelined_calls_complete_in_submission_order() {
        let gateway = SimulatedGateway::new().with_call_delay(Duration::from_millis(2));
        let session = session(&gateway);
        let log = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str| {
            let log = Arc::clone(&log);
            move |outcome: Result<CallValue>| {
                log.lock().push(format!("{}:{}", tag, outcome.is_ok()));
            }
        };

        session.create_session("./flow", push("create")).unwrap();
        session.get_api_version(push("version")).unwrap();
        session.register_front(FRONT, push("front")).unwrap();
        session.init(push("init")).unwrap();
        session.get_trading_day(push("day")).unwrap();
        exit(&session).await;

        assert_eq!(
            *log.lock(),
            vec![
                "create:true",
                "version:true",
                "front:true",
                "init:true",
                "day:true"
            ]
        );
        assert_eq!(gateway.max_concurrent_calls(), 1);
    }

    #[tokio::test]
    async fn test_multi_part_response_reaches_same_handler_in_order() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut acks = record(&session, ResponseKind::RspSubMarketData);
        connect(&session).await;

        let (done, rx) = slot();
        let ids = vec!["IF2401".to_string(), "IF2402".to_string(), "IF2403".to_string()];
        session.subscribe_market_data(ids.clone(), done).unwrap();
        assert_eq!(outcome(rx).await, Ok(CallValue::Status(0)));

        for (i, id) in ids.iter().enumerate() {
            let n = next(&mut acks).await;
            assert_eq!(n.is_final, i == ids.len() - 1);
            match n.data {
                Some(NotificationData::Instrument(field)) => assert_eq!(&field.instrument_id, id),
                other => panic!("unexpected payload: {:?}", other),
            }
        }
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_missing_handler_does_not_strand_later_events() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut disconnects = record(&session, ResponseKind::FrontDisconnected);
        create(&session).await;

        gateway.emit_batch(|spi| {
            spi.on_heart_beat_warning(5000);
            spi.on_front_connected();
            spi.on_front_disconnected(7);
        });

        let n = next(&mut disconnects).await;
        assert_eq!(n.data, Some(NotificationData::Reason(7)));
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_panicking_handler_and_continuation_do_not_stop_pump() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        session.on(ResponseKind::HeartBeatWarning, |_| panic!("handler failed"));
        let mut disconnects = record(&session, ResponseKind::FrontDisconnected);
        create(&session).await;

        assert!(gateway.heart_beat_warning(5000));
        assert!(gateway.disconnect(7));
        let n = next(&mut disconnects).await;
        assert_eq!(n.data, Some(NotificationData::Reason(7)));

        session
            .get_api_version(|_| panic!("continuation failed"))
            .unwrap();
        let (done, rx) = slot();
        session.get_api_version(done).unwrap();
        assert!(outcome(rx).await.unwrap().as_text().is_some());
        assert_eq!(session.in_flight(), 0);

        exit(&session).await;
        tokio::time::timeout(Duration::from_secs(2), session.detached())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_rejected_login_reaches_handler_as_error() {
        let gateway = SimulatedGateway::new().with_login_error(RspInfoField {
            error_id: 3,
            error_msg: "CTP: invalid login".to_string(),
        });
        let session = session(&gateway);
        let mut logins = record(&session, ResponseKind::RspUserLogin);
        connect(&session).await;

        let (done, rx) = slot();
        session.req_user_login(login_field(), 4, done).unwrap();
        assert_eq!(outcome(rx).await, Ok(CallValue::Status(0)));

        let n = next(&mut logins).await;
        assert!(n.is_error());
        assert_eq!(n.request_id, Some(4));
        assert_eq!(n.error.map(|e| e.error_id), Some(3));
        assert_eq!(session.state(), SessionState::Active);
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_fens_user_info_registered_before_init() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        create(&session).await;

        let field = FensUserInfoField {
            broker_id: "9999".to_string(),
            user_id: "000001".to_string(),
            login_mode: String::new(),
        };
        let (done, rx) = slot();
        session.register_fens_user_info(field, done).unwrap();
        assert_eq!(outcome(rx).await, Ok(CallValue::None));

        let (done, _rx) = slot();
        let too_wide = FensUserInfoField {
            login_mode: "01".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            session.register_fens_user_info(too_wide, done),
            Err(BridgeError::InvalidArgument(_))
        ));

        assert_eq!(
            gateway.calls(),
            vec!["create".to_string(), "register_fens_user_info".to_string()]
        );
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect_transitions() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut connected = record(&session, ResponseKind::FrontConnected);
        let mut disconnects = record(&session, ResponseKind::FrontDisconnected);
        connect(&session).await;
        next(&mut connected).await;
        assert_eq!(session.state(), SessionState::Active);

        gateway.disconnect(0x1001);
        next(&mut disconnects).await;
        assert_eq!(session.state(), SessionState::Disconnected);

        gateway.reconnect();
        next(&mut connected).await;
        assert_eq!(session.state(), SessionState::Active);
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_argument_errors_are_synchronous() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);

        let (done, _rx) = slot();
        assert!(matches!(
            session.subscribe_market_data(Vec::new(), done),
            Err(BridgeError::InvalidArgument(_))
        ));
        let (done, _rx) = slot();
        assert!(matches!(
            session.register_front("localhost:17001", done),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert_eq!(session.in_flight(), 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_name_rejected_at_registration() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        assert_eq!(
            session.on_event("RtnTrade", |_| {}),
            Err(BridgeError::UnknownEvent("RtnTrade".to_string()))
        );
        assert_eq!(session.on_event("RspError", |_| {}), Ok(false));
        assert_eq!(session.on_event("RspError", |_| {}), Ok(true));
        assert!(session.has_handler(ResponseKind::RspError));
    }

    #[tokio::test]
    async fn test_create_failure_goes_to_continuation() {
        let gateway = SimulatedGateway::new().with_create_error("library not found");
        let session = session(&gateway);

        let (done, rx) = slot();
        session.create_session("./flow", done).unwrap();
        match outcome(rx).await {
            Err(BridgeError::CallFailed { message, .. }) => {
                assert!(message.contains("library not found"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_native_status_and_panic_reach_continuation() {
        let gateway = SimulatedGateway::new()
            .with_login_status(-2)
            .with_panic_on("trading_day");
        let session = session(&gateway);
        let mut logins = record(&session, ResponseKind::RspUserLogin);
        connect(&session).await;

        let (done, rx) = slot();
        session.req_user_login(login_field(), 3, done).unwrap();
        assert_eq!(outcome(rx).await.unwrap_err().status(), -2);

        let (done, rx) = slot();
        session.get_trading_day(done).unwrap();
        assert!(matches!(outcome(rx).await, Err(BridgeError::NativePanic(_))));

        // Still usable afterwards.
        let (done, rx) = slot();
        session.get_api_version(done).unwrap();
        assert!(outcome(rx).await.unwrap().as_text().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(logins.try_recv().is_err());
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_protocol_error_delivered_as_data() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        let mut errors = record(&session, ResponseKind::RspError);
        create(&session).await;

        let info = RspInfoField {
            error_id: 3,
            error_msg: "CTP: invalid login".to_string(),
        };
        gateway.rsp_error(info.clone(), 9);

        let n = next(&mut errors).await;
        assert_eq!(n.error, Some(info));
        assert_eq!(n.request_id, Some(9));
        assert!(n.is_error());
        exit(&session).await;
    }

    #[tokio::test]
    async fn test_submit_does_not_block_host() {
        let gateway = SimulatedGateway::new().with_call_delay(Duration::from_millis(200));
        let session = session(&gateway);

        let started = Instant::now();
        let (done, rx) = slot();
        session.create_session("./flow", done).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(session.in_flight(), 1);

        outcome(rx).await.unwrap();
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drop_without_exit_releases_handle() {
        let gateway = SimulatedGateway::new();
        let session = session(&gateway);
        create(&session).await;
        drop(session);

        let deadline = Instant::now() + Duration::from_secs(2);
        while gateway.released_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(gateway.released_count(), 1);
    }
}
