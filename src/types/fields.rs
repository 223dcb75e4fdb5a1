//! Market-data session field structs.
//!
//! Owned Rust counterparts of the native fixed-width records. Every value
//! handed over by the callback thread is copied into one of these before it
//! leaves the callback, so nothing here borrows native memory.
//!
//! Serialized with the native field names (`BrokerID`, `LastPrice`, ...) so
//! JS consumers see the same keys the C API documents.

use serde::{Deserialize, Serialize};

/// Native width limits (bytes, excluding the trailing NUL).
pub const BROKER_ID_LEN: usize = 10;
pub const USER_ID_LEN: usize = 15;
pub const PASSWORD_LEN: usize = 40;
pub const INSTRUMENT_ID_LEN: usize = 30;
pub const LOGIN_MODE_LEN: usize = 1;

// =============================================================================
// REQUEST FIELDS (host → native)
// =============================================================================

/// Login request (`ReqUserLogin`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReqUserLoginField {
    pub trading_day: String,
    #[serde(rename = "BrokerID")]
    pub broker_id: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub password: String,
    pub user_product_info: String,
    pub mac_address: String,
    #[serde(rename = "ClientIPAddress")]
    pub client_ip_address: String,
    pub login_remark: String,
}

/// Logout request and logout acknowledgement payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserLogoutField {
    #[serde(rename = "BrokerID")]
    pub broker_id: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
}

/// Name-server user registration (`RegisterFensUserInfo`), sent before `init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FensUserInfoField {
    #[serde(rename = "BrokerID")]
    pub broker_id: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    /// Single native char, empty for the default mode.
    pub login_mode: String,
}

// =============================================================================
// RESPONSE FIELDS (native → host)
// =============================================================================

/// Error payload attached to acknowledgements: `{ ErrorID, ErrorMsg }`.
///
/// The native library reports `ErrorMsg` in GBK. The `MdSpi` implementation
/// wrapping it must decode to UTF-8 before building this field; nothing
/// downstream re-encodes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RspInfoField {
    #[serde(rename = "ErrorID")]
    pub error_id: i32,
    #[serde(rename = "ErrorMsg")]
    pub error_msg: String,
}

impl RspInfoField {
    /// The native layer sends a zeroed record on success.
    pub fn is_error(&self) -> bool {
        self.error_id != 0
    }
}

/// Login acknowledgement payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RspUserLoginField {
    pub trading_day: String,
    pub login_time: String,
    #[serde(rename = "BrokerID")]
    pub broker_id: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub system_name: String,
    #[serde(rename = "FrontID")]
    pub front_id: i32,
    #[serde(rename = "SessionID")]
    pub session_id: i32,
    pub max_order_ref: String,
}

/// Instrument echoed back by (un)subscribe acknowledgements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecificInstrumentField {
    #[serde(rename = "InstrumentID")]
    pub instrument_id: String,
}

/// Depth market data tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepthMarketDataField {
    pub trading_day: String,
    #[serde(rename = "InstrumentID")]
    pub instrument_id: String,
    #[serde(rename = "ExchangeID")]
    pub exchange_id: String,
    pub last_price: f64,
    pub pre_settlement_price: f64,
    pub pre_close_price: f64,
    pub open_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub volume: i32,
    pub turnover: f64,
    pub open_interest: f64,
    pub upper_limit_price: f64,
    pub lower_limit_price: f64,
    pub bid_price1: f64,
    pub bid_volume1: i32,
    pub ask_price1: f64,
    pub ask_volume1: i32,
    pub update_time: String,
    pub update_millisec: i32,
    pub action_day: String,
}

/// Request-for-quote notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForQuoteRspField {
    pub trading_day: String,
    #[serde(rename = "InstrumentID")]
    pub instrument_id: String,
    #[serde(rename = "ForQuoteSysID")]
    pub for_quote_sys_id: String,
    pub for_quote_time: String,
    pub action_day: String,
    #[serde(rename = "ExchangeID")]
    pub exchange_id: String,
}
