//! N-API exports — the `CtpMd` class seen by Node.js.
//!
//! Every request method takes a Node-style callback `(err, result)` and
//! returns immediately. Callbacks and event handlers are wrapped in
//! `ThreadsafeFunction`s and invoked from the session's host pump, which runs
//! on the module's tokio runtime; Node receives them on its main thread.
//!
//! The native library binding is not linked here. The embedding crate
//! registers it once with [`set_native_factory`]; `useSimulatedGateway()`
//! registers the loopback gateway for smoke tests.

use crate::error::BridgeError;
use crate::native::sim::SimulatedGateway;
use crate::native::NativeFactory;
use crate::session::Session;
use crate::types::config::SessionConfig;
use crate::types::fields::{FensUserInfoField, ReqUserLoginField, RspInfoField, UserLogoutField};
use crate::types::notification::{Notification, NotificationData, ResponseKind};
use crate::types::request::CallValue;
use napi::bindgen_prelude::*;
use napi::threadsafe_function::{
    ErrorStrategy, ThreadSafeCallContext, ThreadsafeFunction, ThreadsafeFunctionCallMode,
};
use napi::{Env, JsFunction, JsUnknown};
use napi_derive::napi;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::info;

// =============================================================================
// GLOBAL STATE
// =============================================================================

/// Runtime hosting every session's pump. One worker: continuations and
/// handlers of a session never run concurrently anyway.
static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

pub fn get_runtime() -> &'static tokio::runtime::Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ctp-host")
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime")
    })
}

static NATIVE_FACTORY: OnceLock<Arc<dyn NativeFactory>> = OnceLock::new();

/// Register the native library binding. Only the first registration wins.
pub fn set_native_factory(factory: Arc<dyn NativeFactory>) -> bool {
    NATIVE_FACTORY.set(factory).is_ok()
}

/// Use the loopback gateway instead of a broker connection.
#[napi]
pub fn use_simulated_gateway() -> bool {
    set_native_factory(Arc::new(SimulatedGateway::new()))
}

/// Install the tracing subscriber (the `enableLog` switch).
#[napi]
pub fn enable_log(verbose: Option<bool>) -> bool {
    crate::logging::init_tracing(verbose.unwrap_or(false))
}

impl From<BridgeError> for napi::Error {
    fn from(error: BridgeError) -> Self {
        let status = match &error {
            BridgeError::InvalidArgument(_) | BridgeError::UnknownEvent(_) => Status::InvalidArg,
            _ => Status::GenericFailure,
        };
        napi::Error::new(status, error.to_string())
    }
}

// =============================================================================
// N-API INPUT TYPES (JS → Rust)
// =============================================================================

/// Session configuration from Node.js.
#[napi(object)]
#[derive(Debug, Clone)]
pub struct NapiSessionConfig {
    pub flow_dir: Option<String>,
    pub front_address: Option<String>,
    pub name_server_address: Option<String>,
    pub verbose: Option<bool>,
}

impl From<NapiSessionConfig> for SessionConfig {
    fn from(input: NapiSessionConfig) -> Self {
        SessionConfig {
            flow_dir: input.flow_dir,
            front_address: input.front_address,
            name_server_address: input.name_server_address,
            worker_thread_name: None,
            verbose: input.verbose,
        }
    }
}

// =============================================================================
// JS CONVERSION HELPERS
// =============================================================================

type DoneFn = ThreadsafeFunction<CallValue, ErrorStrategy::CalleeHandled>;
type EventFn = ThreadsafeFunction<Notification, ErrorStrategy::Fatal>;

fn done_fn(callback: JsFunction) -> Result<DoneFn> {
    callback.create_threadsafe_function(0, |ctx: ThreadSafeCallContext<CallValue>| {
        let value = match ctx.value {
            CallValue::None => ctx.env.get_undefined()?.into_unknown(),
            CallValue::Text(s) => ctx.env.create_string(&s)?.into_unknown(),
            CallValue::Status(n) => ctx.env.create_int32(n)?.into_unknown(),
        };
        Ok(vec![value])
    })
}

/// Continuation that forwards the outcome to a JS `(err, result)` callback.
fn continuation(
    callback: JsFunction,
) -> Result<impl FnOnce(crate::error::Result<CallValue>) + Send + 'static> {
    let tsfn = done_fn(callback)?;
    Ok(move |outcome: crate::error::Result<CallValue>| {
        let arg = outcome.map_err(napi::Error::from);
        tsfn.call(arg, ThreadsafeFunctionCallMode::NonBlocking);
    })
}

fn js_value<T: Serialize>(env: &Env, value: Option<&T>) -> Result<JsUnknown> {
    match value {
        Some(v) => env.to_js_value(v),
        None => Ok(env.get_null()?.into_unknown()),
    }
}

/// Error payload as `{ errorId, errorMessage }`.
/// `error_msg` is already UTF-8; the native binding decodes GBK before the SPI.
fn js_error(env: &Env, error: Option<&RspInfoField>) -> Result<JsUnknown> {
    let payload = error.map(|e| {
        serde_json::json!({
            "errorId": e.error_id,
            "errorMessage": e.error_msg,
        })
    });
    js_value(env, payload.as_ref())
}

/// Arguments of an event callback, by kind:
/// `FrontConnected()`, `FrontDisconnected(reason)`, `HeartBeatWarning(ms)`,
/// `RtnX(data)`, `RspX(data, error, requestId, isFinal)`.
fn event_args(env: &Env, notification: Notification) -> Result<Vec<JsUnknown>> {
    let kind = notification.kind;
    match (kind, notification.data) {
        (ResponseKind::FrontConnected, _) => Ok(vec![]),
        (_, Some(NotificationData::Reason(n))) | (_, Some(NotificationData::TimeLapse(n))) => {
            Ok(vec![env.create_int32(n)?.into_unknown()])
        }
        (k, data) if k.is_stream() => Ok(vec![js_value(env, data.as_ref())?]),
        (_, data) => Ok(vec![
            js_value(env, data.as_ref())?,
            js_error(env, notification.error.as_ref())?,
            match notification.request_id {
                Some(id) => env.create_int32(id)?.into_unknown(),
                None => env.get_null()?.into_unknown(),
            },
            env.get_boolean(notification.is_final)?.into_unknown(),
        ]),
    }
}

// =============================================================================
// CTP MARKET-DATA CLASS
// =============================================================================

#[napi]
pub struct CtpMd {
    session: Session,
}

#[napi]
impl CtpMd {
    #[napi(constructor)]
    pub fn new(config: Option<NapiSessionConfig>) -> Result<Self> {
        let config: SessionConfig = config.map(Into::into).unwrap_or_default();
        if config.verbose() {
            crate::logging::init_tracing(true);
        }

        let factory = NATIVE_FACTORY.get().cloned().ok_or_else(|| {
            napi::Error::from_reason(
                "No native library registered. Call useSimulatedGateway() or register one from the embedding crate.",
            )
        })?;

        let _guard = get_runtime().enter();
        let session = Session::new(factory, config)?;
        info!(session = session.id(), "CtpMd created");
        Ok(Self { session })
    }

    #[napi(getter)]
    pub fn state(&self) -> String {
        self.session.state().to_string()
    }

    #[napi(js_name = "createFtdcMdApi", ts_args_type = "flowDir: string | undefined, callback: (err: Error | null) => void")]
    pub fn create_ftdc_md_api(&self, flow_dir: Option<String>, callback: JsFunction) -> Result<()> {
        let flow_dir = flow_dir.unwrap_or_else(|| self.session.config().flow_dir().to_string());
        self.session
            .create_session(&flow_dir, continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "callback: (err: Error | null, version?: string) => void")]
    pub fn get_api_version(&self, callback: JsFunction) -> Result<()> {
        self.session.get_api_version(continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "callback: (err: Error | null) => void")]
    pub fn init(&self, callback: JsFunction) -> Result<()> {
        self.session.init(continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "callback: (err: Error | null, tradingDay?: string) => void")]
    pub fn get_trading_day(&self, callback: JsFunction) -> Result<()> {
        self.session.get_trading_day(continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "address: string, callback: (err: Error | null) => void")]
    pub fn register_front(&self, address: String, callback: JsFunction) -> Result<()> {
        self.session
            .register_front(&address, continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "address: string, callback: (err: Error | null) => void")]
    pub fn register_name_server(&self, address: String, callback: JsFunction) -> Result<()> {
        self.session
            .register_name_server(&address, continuation(callback)?)?;
        Ok(())
    }

    /// `{ BrokerID, UserID, LoginMode }`, before `init`.
    #[napi(ts_args_type = "field: object, callback: (err: Error | null) => void")]
    pub fn register_fens_user_info(&self, field: serde_json::Value, callback: JsFunction) -> Result<()> {
        let field: FensUserInfoField = serde_json::from_value(field)
            .map_err(|e| BridgeError::InvalidArgument(format!("fens user info: {}", e)))?;
        self.session
            .register_fens_user_info(field, continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "instrumentIds: string[], callback: (err: Error | null, status?: number) => void")]
    pub fn subscribe_market_data(&self, instrument_ids: Vec<String>, callback: JsFunction) -> Result<()> {
        self.session
            .subscribe_market_data(instrument_ids, continuation(callback)?)?;
        Ok(())
    }

    #[napi(
        js_name = "unSubscribeMarketData",
        ts_args_type = "instrumentIds: string[], callback: (err: Error | null, status?: number) => void"
    )]
    pub fn unsubscribe_market_data(&self, instrument_ids: Vec<String>, callback: JsFunction) -> Result<()> {
        self.session
            .unsubscribe_market_data(instrument_ids, continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "instrumentIds: string[], callback: (err: Error | null, status?: number) => void")]
    pub fn subscribe_for_quote_rsp(&self, instrument_ids: Vec<String>, callback: JsFunction) -> Result<()> {
        self.session
            .subscribe_for_quote_rsp(instrument_ids, continuation(callback)?)?;
        Ok(())
    }

    #[napi(
        js_name = "unSubscribeForQuoteRsp",
        ts_args_type = "instrumentIds: string[], callback: (err: Error | null, status?: number) => void"
    )]
    pub fn unsubscribe_for_quote_rsp(&self, instrument_ids: Vec<String>, callback: JsFunction) -> Result<()> {
        self.session
            .unsubscribe_for_quote_rsp(instrument_ids, continuation(callback)?)?;
        Ok(())
    }

    /// `field` uses the native keys: `{ BrokerID, UserID, Password, ... }`.
    #[napi(ts_args_type = "field: object, requestId: number, callback: (err: Error | null, status?: number) => void")]
    pub fn req_user_login(&self, field: serde_json::Value, request_id: i32, callback: JsFunction) -> Result<()> {
        let field: ReqUserLoginField = serde_json::from_value(field)
            .map_err(|e| BridgeError::InvalidArgument(format!("login field: {}", e)))?;
        self.session
            .req_user_login(field, request_id, continuation(callback)?)?;
        Ok(())
    }

    #[napi(ts_args_type = "field: object, requestId: number, callback: (err: Error | null, status?: number) => void")]
    pub fn req_user_logout(&self, field: serde_json::Value, request_id: i32, callback: JsFunction) -> Result<()> {
        let field: UserLogoutField = serde_json::from_value(field)
            .map_err(|e| BridgeError::InvalidArgument(format!("logout field: {}", e)))?;
        self.session
            .req_user_logout(field, request_id, continuation(callback)?)?;
        Ok(())
    }

    /// Release the native handle. Registered event callbacks are dropped, so
    /// they no longer keep the Node event loop alive.
    #[napi(ts_args_type = "callback: (err: Error | null) => void")]
    pub fn exit(&self, callback: JsFunction) -> Result<()> {
        self.session.exit(continuation(callback)?)?;
        Ok(())
    }

    /// Register the callback for `eventName`, replacing any previous one.
    #[napi(ts_args_type = "eventName: string, callback: (...args: any[]) => void")]
    pub fn on(&self, event_name: String, callback: JsFunction) -> Result<()> {
        let kind: ResponseKind = event_name.parse().map_err(napi::Error::from)?;
        let tsfn: EventFn = callback
            .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<Notification>| {
                event_args(&ctx.env, ctx.value)
            })?;

        self.session.on(kind, move |notification| {
            tsfn.call(notification, ThreadsafeFunctionCallMode::NonBlocking);
        });
        info!(session = self.session.id(), event = %kind, "Event callback registered");
        Ok(())
    }
}
