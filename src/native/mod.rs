//! The native market-data session, seen only through traits.
//!
//! `NativeSession` is the blocking handle: every method may block on network
//! I/O and must only ever be called from the session's worker thread.
//! `MdSpi` is the callback sink the native library drives from its own
//! internal thread. References passed to `MdSpi` methods are only valid for
//! the duration of the call. Text handed to `MdSpi` is UTF-8: the binding
//! decodes the library's GBK strings (`ErrorMsg` in particular) before calling.

pub mod sim;

use crate::types::fields::{
    DepthMarketDataField, FensUserInfoField, ForQuoteRspField, ReqUserLoginField, RspInfoField,
    RspUserLoginField, SpecificInstrumentField, UserLogoutField,
};
use std::sync::Arc;

/// Callback sink registered with the native session.
pub trait MdSpi: Send + Sync {
    fn on_front_connected(&self);

    /// `reason`: 0x1001 read failure, 0x1002 write failure, 0x2001 heartbeat
    /// receive timeout, 0x2002 heartbeat send failure, 0x2003 bad packet.
    fn on_front_disconnected(&self, reason: i32);

    fn on_heart_beat_warning(&self, time_lapse: i32);

    fn on_rsp_user_login(
        &self,
        data: Option<&RspUserLoginField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    );

    fn on_rsp_user_logout(
        &self,
        data: Option<&UserLogoutField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    );

    fn on_rsp_error(&self, error: Option<&RspInfoField>, request_id: i32, is_last: bool);

    fn on_rsp_sub_market_data(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    );

    fn on_rsp_unsub_market_data(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    );

    fn on_rsp_sub_for_quote_rsp(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    );

    fn on_rsp_unsub_for_quote_rsp(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    );

    fn on_rtn_depth_market_data(&self, data: &DepthMarketDataField);

    fn on_rtn_for_quote_rsp(&self, data: &ForQuoteRspField);
}

/// Blocking handle to one native market-data session.
///
/// Integer returns follow the native convention: `0` accepted, `-1` network
/// failure, `-2` too many unprocessed requests, `-3` request rate exceeded.
pub trait NativeSession: Send {
    fn api_version(&self) -> String;

    /// Start the native I/O thread. Connection progress arrives via `MdSpi`.
    fn init(&mut self);

    fn trading_day(&self) -> String;

    fn register_front(&mut self, address: &str);

    fn register_name_server(&mut self, address: &str);

    /// User info for name-server login. Must precede `init`.
    fn register_fens_user_info(&mut self, field: &FensUserInfoField);

    fn subscribe_market_data(&mut self, instrument_ids: &[String]) -> i32;

    fn unsubscribe_market_data(&mut self, instrument_ids: &[String]) -> i32;

    fn subscribe_for_quote_rsp(&mut self, instrument_ids: &[String]) -> i32;

    fn unsubscribe_for_quote_rsp(&mut self, instrument_ids: &[String]) -> i32;

    fn req_user_login(&mut self, field: &ReqUserLoginField, request_id: i32) -> i32;

    fn req_user_logout(&mut self, field: &UserLogoutField, request_id: i32) -> i32;

    /// Unregister the callback sink and free the handle. No `MdSpi` call may
    /// start after this returns.
    fn release(&mut self);
}

/// Constructs native handles. Failure here is the only "fatal" condition and
/// is still reported through the `CreateSession` continuation.
pub trait NativeFactory: Send + Sync {
    fn create(
        &self,
        flow_dir: &str,
        spi: Arc<dyn MdSpi>,
    ) -> Result<Box<dyn NativeSession>, String>;
}

/// Human-readable text for native request status codes.
pub fn status_message(status: i32) -> &'static str {
    match status {
        0 => "accepted",
        -1 => "network connection failed",
        -2 => "too many unprocessed requests",
        -3 => "request rate limit exceeded",
        _ => "request rejected by native session",
    }
}
