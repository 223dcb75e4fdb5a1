//! Call requests: one blocking operation the host wants performed.
//!
//! The request owns its payload and its continuation. It is moved into the
//! worker queue, executed once, moved back to the host pump, and consumed by
//! [`CallRequest::complete`], which is the only place the continuation runs.

use crate::error::{BridgeError, Result};
use crate::types::fields::{
    FensUserInfoField, ReqUserLoginField, UserLogoutField, BROKER_ID_LEN, INSTRUMENT_ID_LEN,
    LOGIN_MODE_LEN, PASSWORD_LEN, USER_ID_LEN,
};
use std::fmt;
use std::time::Instant;

/// Host-side callback receiving `Err(error)` or `Ok(value)`, exactly once.
pub type Continuation = Box<dyn FnOnce(Result<CallValue>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    CreateSession,
    GetApiVersion,
    Init,
    GetTradingDay,
    RegisterFront,
    RegisterNameServer,
    RegisterFensUserInfo,
    SubscribeMarketData,
    UnsubscribeMarketData,
    SubscribeForQuoteRsp,
    UnsubscribeForQuoteRsp,
    ReqUserLogin,
    ReqUserLogout,
    Exit,
}

/// Shape of the value a successful call hands to its continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    Nothing,
    Text,
    Status,
}

impl ReturnShape {
    pub fn matches(&self, value: &CallValue) -> bool {
        matches!(
            (self, value),
            (ReturnShape::Nothing, CallValue::None)
                | (ReturnShape::Text, CallValue::Text(_))
                | (ReturnShape::Status, CallValue::Status(_))
        )
    }
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::CreateSession => "createFtdcMdApi",
            RequestKind::GetApiVersion => "getApiVersion",
            RequestKind::Init => "init",
            RequestKind::GetTradingDay => "getTradingDay",
            RequestKind::RegisterFront => "registerFront",
            RequestKind::RegisterNameServer => "registerNameServer",
            RequestKind::RegisterFensUserInfo => "registerFensUserInfo",
            RequestKind::SubscribeMarketData => "subscribeMarketData",
            RequestKind::UnsubscribeMarketData => "unSubscribeMarketData",
            RequestKind::SubscribeForQuoteRsp => "subscribeForQuoteRsp",
            RequestKind::UnsubscribeForQuoteRsp => "unSubscribeForQuoteRsp",
            RequestKind::ReqUserLogin => "reqUserLogin",
            RequestKind::ReqUserLogout => "reqUserLogout",
            RequestKind::Exit => "exit",
        }
    }

    pub fn returns(&self) -> ReturnShape {
        match self {
            RequestKind::GetApiVersion | RequestKind::GetTradingDay => ReturnShape::Text,
            RequestKind::SubscribeMarketData
            | RequestKind::UnsubscribeMarketData
            | RequestKind::SubscribeForQuoteRsp
            | RequestKind::UnsubscribeForQuoteRsp
            | RequestKind::ReqUserLogin
            | RequestKind::ReqUserLogout => ReturnShape::Status,
            _ => ReturnShape::Nothing,
        }
    }

    /// Calls that only make sense once the native I/O thread is running.
    pub fn requires_init(&self) -> bool {
        matches!(
            self,
            RequestKind::GetTradingDay
                | RequestKind::SubscribeMarketData
                | RequestKind::UnsubscribeMarketData
                | RequestKind::SubscribeForQuoteRsp
                | RequestKind::UnsubscribeForQuoteRsp
                | RequestKind::ReqUserLogin
                | RequestKind::ReqUserLogout
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request together with its owned payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    CreateSession { flow_dir: String },
    GetApiVersion,
    Init,
    GetTradingDay,
    RegisterFront { address: String },
    RegisterNameServer { address: String },
    RegisterFensUserInfo { field: FensUserInfoField },
    SubscribeMarketData { instrument_ids: Vec<String> },
    UnsubscribeMarketData { instrument_ids: Vec<String> },
    SubscribeForQuoteRsp { instrument_ids: Vec<String> },
    UnsubscribeForQuoteRsp { instrument_ids: Vec<String> },
    UserLogin { field: ReqUserLoginField },
    UserLogout { field: UserLogoutField },
    Exit,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::CreateSession { .. } => RequestKind::CreateSession,
            Request::GetApiVersion => RequestKind::GetApiVersion,
            Request::Init => RequestKind::Init,
            Request::GetTradingDay => RequestKind::GetTradingDay,
            Request::RegisterFront { .. } => RequestKind::RegisterFront,
            Request::RegisterNameServer { .. } => RequestKind::RegisterNameServer,
            Request::RegisterFensUserInfo { .. } => RequestKind::RegisterFensUserInfo,
            Request::SubscribeMarketData { .. } => RequestKind::SubscribeMarketData,
            Request::UnsubscribeMarketData { .. } => RequestKind::UnsubscribeMarketData,
            Request::SubscribeForQuoteRsp { .. } => RequestKind::SubscribeForQuoteRsp,
            Request::UnsubscribeForQuoteRsp { .. } => RequestKind::UnsubscribeForQuoteRsp,
            Request::UserLogin { .. } => RequestKind::ReqUserLogin,
            Request::UserLogout { .. } => RequestKind::ReqUserLogout,
            Request::Exit => RequestKind::Exit,
        }
    }

    /// Reject malformed input before anything is enqueued.
    pub fn validate(&self) -> Result<()> {
        match self {
            Request::RegisterFront { address } | Request::RegisterNameServer { address } => {
                validate_address(address)
            }
            Request::SubscribeMarketData { instrument_ids }
            | Request::UnsubscribeMarketData { instrument_ids }
            | Request::SubscribeForQuoteRsp { instrument_ids }
            | Request::UnsubscribeForQuoteRsp { instrument_ids } => {
                validate_instruments(instrument_ids)
            }
            Request::UserLogin { field } => {
                check_width("BrokerID", &field.broker_id, BROKER_ID_LEN)?;
                check_width("UserID", &field.user_id, USER_ID_LEN)?;
                check_width("Password", &field.password, PASSWORD_LEN)
            }
            Request::RegisterFensUserInfo { field } => {
                check_width("BrokerID", &field.broker_id, BROKER_ID_LEN)?;
                check_width("UserID", &field.user_id, USER_ID_LEN)?;
                check_width("LoginMode", &field.login_mode, LOGIN_MODE_LEN)
            }
            Request::UserLogout { field } => {
                check_width("BrokerID", &field.broker_id, BROKER_ID_LEN)?;
                check_width("UserID", &field.user_id, USER_ID_LEN)
            }
            _ => Ok(()),
        }
    }
}

fn check_width(name: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(BridgeError::InvalidArgument(format!(
            "{} exceeds {} bytes",
            name, max
        )));
    }
    Ok(())
}

/// Front addresses look like `tcp://180.168.146.187:10031`.
fn validate_address(address: &str) -> Result<()> {
    let rest = address
        .strip_prefix("tcp://")
        .or_else(|| address.strip_prefix("udp://"))
        .ok_or_else(|| {
            BridgeError::InvalidArgument(format!(
                "front address must start with tcp:// or udp://, got {:?}",
                address
            ))
        })?;

    let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
        BridgeError::InvalidArgument(format!("front address missing port: {:?}", address))
    })?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(BridgeError::InvalidArgument(format!(
            "malformed front address: {:?}",
            address
        )));
    }
    Ok(())
}

fn validate_instruments(instrument_ids: &[String]) -> Result<()> {
    if instrument_ids.is_empty() {
        return Err(BridgeError::InvalidArgument(
            "instrument list must not be empty".to_string(),
        ));
    }
    for id in instrument_ids {
        if id.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "instrument id must not be empty".to_string(),
            ));
        }
        check_width("InstrumentID", id, INSTRUMENT_ID_LEN)?;
    }
    Ok(())
}

/// Value handed to a successful continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallValue {
    None,
    Text(String),
    Status(i32),
}

impl CallValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CallValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<i32> {
        match self {
            CallValue::Status(n) => Some(*n),
            _ => None,
        }
    }
}

/// Result slot written by the worker thread.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub status: i32,
    pub value: CallValue,
    pub error: Option<BridgeError>,
}

impl Default for CallResult {
    fn default() -> Self {
        Self {
            status: 0,
            value: CallValue::None,
            error: None,
        }
    }
}

impl CallResult {
    pub fn ok(value: CallValue) -> Self {
        Self {
            status: 0,
            value,
            error: None,
        }
    }

    pub fn failed(error: BridgeError) -> Self {
        Self {
            status: error.status(),
            value: CallValue::None,
            error: Some(error),
        }
    }

    /// An error wins over any value that was written.
    pub fn into_outcome(self) -> Result<CallValue> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }
}

pub struct CallRequest {
    pub request: Request,
    pub request_id: Option<i32>,
    pub result: CallResult,
    pub submitted_at: Instant,
    continuation: Option<Continuation>,
}

impl CallRequest {
    pub fn new(request: Request, request_id: Option<i32>, continuation: Continuation) -> Self {
        Self {
            request,
            request_id,
            result: CallResult::default(),
            submitted_at: Instant::now(),
            continuation: Some(continuation),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }

    /// Run the continuation with the result. Consumes the request, so a
    /// second invocation cannot be expressed.
    pub fn complete(mut self) {
        let outcome = std::mem::take(&mut self.result).into_outcome();
        if let Some(continuation) = self.continuation.take() {
            continuation(outcome);
        }
    }
}

impl fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRequest")
            .field("kind", &self.kind())
            .field("request_id", &self.request_id)
            .field("result", &self.result)
            .finish()
    }
}
