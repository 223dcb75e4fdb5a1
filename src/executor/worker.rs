//! Worker state. The only owner of the native handle.
//!
//! Lives on the worker thread. Executes exactly one native operation per
//! request and writes the outcome into the request's result slot; panics and
//! non-zero statuses are captured there, never propagated.

use crate::error::BridgeError;
use crate::native::{status_message, MdSpi, NativeFactory, NativeSession};
use crate::types::request::{CallResult, CallValue, Request, RequestKind};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub struct WorkerState {
    factory: Arc<dyn NativeFactory>,
    spi: Arc<dyn MdSpi>,
    handle: Option<Box<dyn NativeSession>>,
    initialized: bool,
    released: bool,
}

impl WorkerState {
    pub fn new(factory: Arc<dyn NativeFactory>, spi: Arc<dyn MdSpi>) -> Self {
        Self {
            factory,
            spi,
            handle: None,
            initialized: false,
            released: false,
        }
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Execute one request against the native handle.
    pub fn execute(&mut self, request: &Request, request_id: Option<i32>) -> CallResult {
        let kind = request.kind();
        if let Err(error) = self.check_ready(kind) {
            return CallResult::failed(error);
        }

        match catch_unwind(AssertUnwindSafe(|| self.invoke(request, request_id))) {
            Ok(result) if result.error.is_none() && !kind.returns().matches(&result.value) => {
                CallResult::failed(BridgeError::CallFailed {
                    status: -1,
                    message: format!("unexpected return value for {}", kind),
                })
            }
            Ok(result) => result,
            Err(payload) => {
                CallResult::failed(BridgeError::NativePanic(panic_message(payload.as_ref())))
            }
        }
    }

    fn check_ready(&self, kind: RequestKind) -> Result<(), BridgeError> {
        if self.released {
            return Err(not_ready("native session already released"));
        }
        match kind {
            RequestKind::CreateSession if self.handle.is_some() => {
                Err(not_ready("native session already created"))
            }
            RequestKind::CreateSession | RequestKind::Exit => Ok(()),
            _ if self.handle.is_none() => Err(not_ready("native session not created")),
            _ if kind.requires_init() && !self.initialized => {
                Err(not_ready("native session not initialized"))
            }
            _ => Ok(()),
        }
    }

    fn invoke(&mut self, request: &Request, request_id: Option<i32>) -> CallResult {
        if let Request::CreateSession { flow_dir } = request {
            return match self.factory.create(flow_dir, Arc::clone(&self.spi)) {
                Ok(handle) => {
                    self.handle = Some(handle);
                    CallResult::ok(CallValue::None)
                }
                Err(message) => CallResult::failed(BridgeError::CallFailed {
                    status: -1,
                    message: format!("Failed to create native session: {}", message),
                }),
            };
        }

        if let Request::Exit = request {
            self.release();
            return CallResult::ok(CallValue::None);
        }

        let Some(api) = self.handle.as_mut() else {
            return CallResult::failed(not_ready("native session not created"));
        };
        let request_id = request_id.unwrap_or(0);

        match request {
            Request::GetApiVersion => CallResult::ok(CallValue::Text(api.api_version())),
            Request::Init => {
                api.init();
                self.initialized = true;
                CallResult::ok(CallValue::None)
            }
            Request::GetTradingDay => CallResult::ok(CallValue::Text(api.trading_day())),
            Request::RegisterFront { address } => {
                api.register_front(address);
                CallResult::ok(CallValue::None)
            }
            Request::RegisterNameServer { address } => {
                api.register_name_server(address);
                CallResult::ok(CallValue::None)
            }
            Request::RegisterFensUserInfo { field } => {
                api.register_fens_user_info(field);
                CallResult::ok(CallValue::None)
            }
            Request::SubscribeMarketData { instrument_ids } => {
                status_result(api.subscribe_market_data(instrument_ids))
            }
            Request::UnsubscribeMarketData { instrument_ids } => {
                status_result(api.unsubscribe_market_data(instrument_ids))
            }
            Request::SubscribeForQuoteRsp { instrument_ids } => {
                status_result(api.subscribe_for_quote_rsp(instrument_ids))
            }
            Request::UnsubscribeForQuoteRsp { instrument_ids } => {
                status_result(api.unsubscribe_for_quote_rsp(instrument_ids))
            }
            Request::UserLogin { field } => status_result(api.req_user_login(field, request_id)),
            Request::UserLogout { field } => {
                status_result(api.req_user_logout(field, request_id))
            }
            Request::CreateSession { .. } | Request::Exit => unreachable!("handled above"),
        }
    }

    /// Unregister the callback sink and free the handle. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut api) = self.handle.take() {
            api.release();
        }
        self.initialized = false;
        self.released = true;
    }
}

fn not_ready(message: &str) -> BridgeError {
    BridgeError::CallFailed {
        status: -1,
        message: message.to_string(),
    }
}

fn status_result(status: i32) -> CallResult {
    if status == 0 {
        CallResult::ok(CallValue::Status(0))
    } else {
        CallResult {
            status,
            value: CallValue::Status(status),
            error: Some(BridgeError::CallFailed {
                status,
                message: status_message(status).to_string(),
            }),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
