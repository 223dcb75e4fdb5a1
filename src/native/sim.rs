//! Loopback market-data gateway.
//!
//! Behaves like the native library as far as the bridge can observe: calls
//! block the caller (optionally for a configured delay), and every callback
//! is raised from a dedicated callback thread owned by the session, with
//! payloads that live only on that thread's stack.
//!
//! Used by the test-suite and for smoke-testing the N-API module without a
//! broker connection.

use crate::native::{MdSpi, NativeFactory, NativeSession};
use crate::queue::ConcurrentQueue;
use crate::types::fields::{
    DepthMarketDataField, FensUserInfoField, ForQuoteRspField, ReqUserLoginField, RspInfoField,
    RspUserLoginField, SpecificInstrumentField, UserLogoutField,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

type Emit = Box<dyn FnOnce(&dyn MdSpi) + Send>;

enum SimEvent {
    Emit(Emit),
    Stop,
}

#[derive(Debug, Clone)]
struct SimOptions {
    create_error: Option<String>,
    login_status: i32,
    login_error: Option<RspInfoField>,
    call_delay: Duration,
    panic_on: Option<&'static str>,
    trading_day: String,
    api_version: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            create_error: None,
            login_status: 0,
            login_error: None,
            call_delay: Duration::ZERO,
            panic_on: None,
            trading_day: "20240105".to_string(),
            api_version: "v6.3.15_20190220 9:39:53 (sim)".to_string(),
        }
    }
}

#[derive(Default)]
struct SimShared {
    options: Mutex<SimOptions>,
    live: Mutex<Option<Arc<ConcurrentQueue<SimEvent>>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    created: AtomicUsize,
    released: AtomicUsize,
}

/// Factory for simulated sessions. Clones share state, so a test can keep
/// one clone for inspection and hand another to the session.
#[derive(Clone, Default)]
pub struct SimulatedGateway {
    shared: Arc<SimShared>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail as if the native library could not be loaded.
    pub fn with_create_error(self, message: &str) -> Self {
        self.shared.options.lock().create_error = Some(message.to_string());
        self
    }

    /// Status returned by `req_user_login` (non-zero: no acknowledgement is sent).
    pub fn with_login_status(self, status: i32) -> Self {
        self.shared.options.lock().login_status = status;
        self
    }

    /// Error record attached to the login acknowledgement.
    pub fn with_login_error(self, error: RspInfoField) -> Self {
        self.shared.options.lock().login_error = Some(error);
        self
    }

    /// Every native call sleeps this long before returning.
    pub fn with_call_delay(self, delay: Duration) -> Self {
        self.shared.options.lock().call_delay = delay;
        self
    }

    /// Panic inside the named native method (e.g. `"trading_day"`).
    pub fn with_panic_on(self, method: &'static str) -> Self {
        self.shared.options.lock().panic_on = Some(method);
        self
    }

    /// Native methods invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().clone()
    }

    /// Highest number of native calls observed executing at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Raise `FrontDisconnected` from the callback thread.
    pub fn disconnect(&self, reason: i32) -> bool {
        self.emit(move |spi| spi.on_front_disconnected(reason))
    }

    /// Raise `FrontConnected` from the callback thread (reconnect).
    pub fn reconnect(&self) -> bool {
        self.emit(|spi| spi.on_front_connected())
    }

    pub fn heart_beat_warning(&self, time_lapse: i32) -> bool {
        self.emit(move |spi| spi.on_heart_beat_warning(time_lapse))
    }

    pub fn push_tick(&self, instrument_id: &str, last_price: f64) -> bool {
        let tick = sample_tick(instrument_id, last_price);
        self.emit(move |spi| spi.on_rtn_depth_market_data(&tick))
    }

    pub fn push_for_quote(&self, instrument_id: &str) -> bool {
        let field = ForQuoteRspField {
            trading_day: self.shared.options.lock().trading_day.clone(),
            instrument_id: instrument_id.to_string(),
            for_quote_sys_id: "FQ0001".to_string(),
            for_quote_time: "09:30:00".to_string(),
            action_day: "20240105".to_string(),
            exchange_id: "CFFEX".to_string(),
        };
        self.emit(move |spi| spi.on_rtn_for_quote_rsp(&field))
    }

    pub fn rsp_error(&self, error: RspInfoField, request_id: i32) -> bool {
        self.emit(move |spi| spi.on_rsp_error(Some(&error), request_id, true))
    }

    /// Run an arbitrary sequence of callbacks on the callback thread, back to
    /// back, without yielding between them.
    pub fn emit_batch<F>(&self, f: F) -> bool
    where
        F: FnOnce(&dyn MdSpi) + Send + 'static,
    {
        self.emit(f)
    }

    fn emit<F>(&self, f: F) -> bool
    where
        F: FnOnce(&dyn MdSpi) + Send + 'static,
    {
        match self.shared.live.lock().as_ref() {
            Some(queue) => {
                queue.push(SimEvent::Emit(Box::new(f)));
                true
            }
            None => false,
        }
    }
}

impl NativeFactory for SimulatedGateway {
    fn create(
        &self,
        flow_dir: &str,
        spi: Arc<dyn MdSpi>,
    ) -> Result<Box<dyn NativeSession>, String> {
        let _guard = CallGuard::enter(&self.shared, "create");

        if let Some(message) = self.shared.options.lock().create_error.clone() {
            return Err(message);
        }

        let queue: Arc<ConcurrentQueue<SimEvent>> = Arc::new(ConcurrentQueue::new());
        let thread = {
            let queue = Arc::clone(&queue);
            std::thread::Builder::new()
                .name("ctp-sim-spi".to_string())
                .spawn(move || callback_loop(queue, spi))
                .map_err(|e| format!("Failed to spawn callback thread: {}", e))?
        };

        *self.shared.live.lock() = Some(Arc::clone(&queue));
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        debug!(flow_dir = %flow_dir, "Simulated session created");

        Ok(Box::new(SimSession {
            shared: Arc::clone(&self.shared),
            callbacks: queue,
            thread: Some(thread),
            fronts: Vec::new(),
            initialized: false,
            connected: false,
        }))
    }
}

fn callback_loop(queue: Arc<ConcurrentQueue<SimEvent>>, spi: Arc<dyn MdSpi>) {
    loop {
        match queue.pop() {
            SimEvent::Emit(f) => f(spi.as_ref()),
            SimEvent::Stop => break,
        }
    }
}

/// Tracks concurrent native calls; decrements even when the call panics.
struct CallGuard {
    shared: Arc<SimShared>,
}

impl CallGuard {
    fn enter(shared: &Arc<SimShared>, method: &'static str) -> Self {
        shared.calls.lock().push(method.to_string());
        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let options = shared.options.lock().clone();
        if !options.call_delay.is_zero() {
            std::thread::sleep(options.call_delay);
        }

        let guard = Self {
            shared: Arc::clone(shared),
        };
        if options.panic_on == Some(method) {
            panic!("simulated fault in {}", method);
        }
        guard
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SimSession {
    shared: Arc<SimShared>,
    callbacks: Arc<ConcurrentQueue<SimEvent>>,
    thread: Option<JoinHandle<()>>,
    fronts: Vec<String>,
    initialized: bool,
    connected: bool,
}

impl SimSession {
    fn enter(&self, method: &'static str) -> CallGuard {
        CallGuard::enter(&self.shared, method)
    }

    fn emit<F>(&self, f: F)
    where
        F: FnOnce(&dyn MdSpi) + Send + 'static,
    {
        self.callbacks.push(SimEvent::Emit(Box::new(f)));
    }

    /// Acknowledge each instrument; only the last fragment is final.
    fn ack_instruments<F>(&self, instrument_ids: &[String], ack: F)
    where
        F: Fn(&dyn MdSpi, &SpecificInstrumentField, bool) + Send + Sync + 'static,
    {
        let fields: Vec<SpecificInstrumentField> = instrument_ids
            .iter()
            .map(|id| SpecificInstrumentField {
                instrument_id: id.clone(),
            })
            .collect();
        self.emit(move |spi| {
            let last = fields.len().saturating_sub(1);
            for (i, field) in fields.iter().enumerate() {
                ack(spi, field, i == last);
            }
        });
    }

    fn stop_callbacks(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.callbacks.push(SimEvent::Stop);
            let _ = thread.join();
        }
        let mut live = self.shared.live.lock();
        if live
            .as_ref()
            .map(|q| Arc::ptr_eq(q, &self.callbacks))
            .unwrap_or(false)
        {
            *live = None;
        }
    }
}

impl NativeSession for SimSession {
    fn api_version(&self) -> String {
        let _guard = self.enter("api_version");
        self.shared.options.lock().api_version.clone()
    }

    fn init(&mut self) {
        let _guard = self.enter("init");
        self.initialized = true;
        if !self.fronts.is_empty() {
            self.connected = true;
            self.emit(|spi| spi.on_front_connected());
        }
    }

    fn trading_day(&self) -> String {
        let _guard = self.enter("trading_day");
        self.shared.options.lock().trading_day.clone()
    }

    fn register_front(&mut self, address: &str) {
        let _guard = self.enter("register_front");
        self.fronts.push(address.to_string());
    }

    fn register_name_server(&mut self, address: &str) {
        let _guard = self.enter("register_name_server");
        self.fronts.push(address.to_string());
    }

    fn register_fens_user_info(&mut self, field: &FensUserInfoField) {
        let _guard = self.enter("register_fens_user_info");
        debug!(broker_id = %field.broker_id, user_id = %field.user_id, "Fens user registered");
    }

    fn subscribe_market_data(&mut self, instrument_ids: &[String]) -> i32 {
        let _guard = self.enter("subscribe_market_data");
        if !self.connected {
            return -1;
        }
        self.ack_instruments(instrument_ids, |spi, field, last| {
            spi.on_rsp_sub_market_data(Some(field), None, 0, last)
        });
        for id in instrument_ids {
            let tick = sample_tick(id, 3500.0);
            self.emit(move |spi| spi.on_rtn_depth_market_data(&tick));
        }
        0
    }

    fn unsubscribe_market_data(&mut self, instrument_ids: &[String]) -> i32 {
        let _guard = self.enter("unsubscribe_market_data");
        if !self.connected {
            return -1;
        }
        self.ack_instruments(instrument_ids, |spi, field, last| {
            spi.on_rsp_unsub_market_data(Some(field), None, 0, last)
        });
        0
    }

    fn subscribe_for_quote_rsp(&mut self, instrument_ids: &[String]) -> i32 {
        let _guard = self.enter("subscribe_for_quote_rsp");
        if !self.connected {
            return -1;
        }
        self.ack_instruments(instrument_ids, |spi, field, last| {
            spi.on_rsp_sub_for_quote_rsp(Some(field), None, 0, last)
        });
        0
    }

    fn unsubscribe_for_quote_rsp(&mut self, instrument_ids: &[String]) -> i32 {
        let _guard = self.enter("unsubscribe_for_quote_rsp");
        if !self.connected {
            return -1;
        }
        self.ack_instruments(instrument_ids, |spi, field, last| {
            spi.on_rsp_unsub_for_quote_rsp(Some(field), None, 0, last)
        });
        0
    }

    fn req_user_login(&mut self, field: &ReqUserLoginField, request_id: i32) -> i32 {
        let _guard = self.enter("req_user_login");
        if !self.connected {
            return -1;
        }
        let options = self.shared.options.lock().clone();
        if options.login_status != 0 {
            return options.login_status;
        }

        let data = RspUserLoginField {
            trading_day: options.trading_day.clone(),
            login_time: "09:00:00".to_string(),
            broker_id: field.broker_id.clone(),
            user_id: field.user_id.clone(),
            system_name: "SimNow".to_string(),
            front_id: 1,
            session_id: 42,
            max_order_ref: "1".to_string(),
        };
        let error = options.login_error;
        self.emit(move |spi| {
            spi.on_rsp_user_login(Some(&data), error.as_ref(), request_id, true)
        });
        0
    }

    fn req_user_logout(&mut self, field: &UserLogoutField, request_id: i32) -> i32 {
        let _guard = self.enter("req_user_logout");
        if !self.connected {
            return -1;
        }
        let data = field.clone();
        self.emit(move |spi| spi.on_rsp_user_logout(Some(&data), None, request_id, true));
        0
    }

    fn release(&mut self) {
        let _guard = self.enter("release");
        self.stop_callbacks();
        self.connected = false;
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.stop_callbacks();
    }
}

fn sample_tick(instrument_id: &str, last_price: f64) -> DepthMarketDataField {
    DepthMarketDataField {
        trading_day: "20240105".to_string(),
        instrument_id: instrument_id.to_string(),
        exchange_id: "CFFEX".to_string(),
        last_price,
        pre_settlement_price: last_price - 10.0,
        pre_close_price: last_price - 12.0,
        open_price: last_price - 5.0,
        highest_price: last_price + 8.0,
        lowest_price: last_price - 9.0,
        volume: 1200,
        turnover: last_price * 1200.0 * 300.0,
        open_interest: 15000.0,
        upper_limit_price: last_price * 1.1,
        lower_limit_price: last_price * 0.9,
        bid_price1: last_price - 0.2,
        bid_volume1: 3,
        ask_price1: last_price + 0.2,
        ask_volume1: 5,
        update_time: "09:30:00".to_string(),
        update_millisec: 500,
        action_day: "20240105".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Records callback names; used to check what the callback thread raised.
    struct RecordingSpi {
        tx: Mutex<mpsc::Sender<String>>,
    }

    impl RecordingSpi {
        fn record(&self, event: String) {
            let _ = self.tx.lock().send(event);
        }
    }

    impl MdSpi for RecordingSpi {
        fn on_front_connected(&self) {
            self.record("FrontConnected".to_string());
        }
        fn on_front_disconnected(&self, reason: i32) {
            self.record(format!("FrontDisconnected:{}", reason));
        }
        fn on_heart_beat_warning(&self, time_lapse: i32) {
            self.record(format!("HeartBeatWarning:{}", time_lapse));
        }
        fn on_rsp_user_login(
            &self,
            _data: Option<&RspUserLoginField>,
            _error: Option<&RspInfoField>,
            request_id: i32,
            _is_last: bool,
        ) {
            self.record(format!("RspUserLogin:{}", request_id));
        }
        fn on_rsp_user_logout(
            &self,
            _data: Option<&UserLogoutField>,
            _error: Option<&RspInfoField>,
            request_id: i32,
            _is_last: bool,
        ) {
            self.record(format!("RspUserLogout:{}", request_id));
        }
        fn on_rsp_error(&self, _error: Option<&RspInfoField>, request_id: i32, _is_last: bool) {
            self.record(format!("RspError:{}", request_id));
        }
        fn on_rsp_sub_market_data(
            &self,
            data: Option<&SpecificInstrumentField>,
            _error: Option<&RspInfoField>,
            _request_id: i32,
            is_last: bool,
        ) {
            let id = data.map(|d| d.instrument_id.clone()).unwrap_or_default();
            self.record(format!("RspSubMarketData:{}:{}", id, is_last));
        }
        fn on_rsp_unsub_market_data(
            &self,
            _data: Option<&SpecificInstrumentField>,
            _error: Option<&RspInfoField>,
            _request_id: i32,
            _is_last: bool,
        ) {
            self.record("RspUnSubMarketData".to_string());
        }
        fn on_rsp_sub_for_quote_rsp(
            &self,
            _data: Option<&SpecificInstrumentField>,
            _error: Option<&RspInfoField>,
            _request_id: i32,
            _is_last: bool,
        ) {
            self.record("RspSubForQuoteRsp".to_string());
        }
        fn on_rsp_unsub_for_quote_rsp(
            &self,
            _data: Option<&SpecificInstrumentField>,
            _error: Option<&RspInfoField>,
            _request_id: i32,
            _is_last: bool,
        ) {
            self.record("RspUnSubForQuoteRsp".to_string());
        }
        fn on_rtn_depth_market_data(&self, data: &DepthMarketDataField) {
            self.record(format!("RtnDepthMarketData:{}", data.instrument_id));
        }
        fn on_rtn_for_quote_rsp(&self, data: &ForQuoteRspField) {
            self.record(format!("RtnForQuoteRsp:{}", data.instrument_id));
        }
    }

    fn recording() -> (Arc<dyn MdSpi>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let spi: Arc<dyn MdSpi> = Arc::new(RecordingSpi { tx: Mutex::new(tx) });
        (spi, rx)
    }

    fn next(rx: &mpsc::Receiver<String>) -> String {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_init_without_front_does_not_connect() {
        let gateway = SimulatedGateway::new();
        let (spi, rx) = recording();
        let mut session = gateway.create("/tmp/flow", spi).unwrap();
        session.init();
        assert_eq!(session.req_user_login(&ReqUserLoginField::default(), 1), -1);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        session.release();
    }

    #[test]
    fn test_login_and_subscribe_raise_callbacks_in_order() {
        let gateway = SimulatedGateway::new();
        let (spi, rx) = recording();
        let mut session = gateway.create("/tmp/flow", spi).unwrap();
        session.register_front("tcp://127.0.0.1:17001");
        session.init();
        assert_eq!(next(&rx), "FrontConnected");

        assert_eq!(session.req_user_login(&ReqUserLoginField::default(), 7), 0);
        assert_eq!(next(&rx), "RspUserLogin:7");

        let ids = vec!["IF2401".to_string(), "IF2402".to_string()];
        assert_eq!(session.subscribe_market_data(&ids), 0);
        assert_eq!(next(&rx), "RspSubMarketData:IF2401:false");
        assert_eq!(next(&rx), "RspSubMarketData:IF2402:true");
        assert_eq!(next(&rx), "RtnDepthMarketData:IF2401");
        assert_eq!(next(&rx), "RtnDepthMarketData:IF2402");

        session.release();
        assert_eq!(gateway.released_count(), 1);
        assert!(!gateway.disconnect(0x1001));
    }

    #[test]
    fn test_create_error_and_call_log() {
        let gateway = SimulatedGateway::new().with_create_error("libthostmduserapi.so not found");
        let (spi, _rx) = recording();
        assert!(gateway.create("/tmp/flow", spi).is_err());
        assert_eq!(gateway.calls(), vec!["create".to_string()]);
        assert_eq!(gateway.created_count(), 0);
    }
}
