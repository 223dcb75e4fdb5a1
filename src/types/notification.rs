//! One event raised on the native callback thread, as an owned value.
//!
//! Built once by the producer, moved through the channel, consumed by the
//! host pump. Never mutated after construction.

use crate::error::BridgeError;
use crate::types::fields::{
    DepthMarketDataField, ForQuoteRspField, RspInfoField, RspUserLoginField,
    SpecificInstrumentField, UserLogoutField,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Event kinds a host can register a handler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResponseKind {
    FrontConnected,
    FrontDisconnected,
    HeartBeatWarning,
    RspUserLogin,
    RspUserLogout,
    RspError,
    RspSubMarketData,
    RspUnSubMarketData,
    RspSubForQuoteRsp,
    RspUnSubForQuoteRsp,
    RtnDepthMarketData,
    RtnForQuoteRsp,
}

impl ResponseKind {
    pub const ALL: [ResponseKind; 12] = [
        ResponseKind::FrontConnected,
        ResponseKind::FrontDisconnected,
        ResponseKind::HeartBeatWarning,
        ResponseKind::RspUserLogin,
        ResponseKind::RspUserLogout,
        ResponseKind::RspError,
        ResponseKind::RspSubMarketData,
        ResponseKind::RspUnSubMarketData,
        ResponseKind::RspSubForQuoteRsp,
        ResponseKind::RspUnSubForQuoteRsp,
        ResponseKind::RtnDepthMarketData,
        ResponseKind::RtnForQuoteRsp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::FrontConnected => "FrontConnected",
            ResponseKind::FrontDisconnected => "FrontDisconnected",
            ResponseKind::HeartBeatWarning => "HeartBeatWarning",
            ResponseKind::RspUserLogin => "RspUserLogin",
            ResponseKind::RspUserLogout => "RspUserLogout",
            ResponseKind::RspError => "RspError",
            ResponseKind::RspSubMarketData => "RspSubMarketData",
            ResponseKind::RspUnSubMarketData => "RspUnSubMarketData",
            ResponseKind::RspSubForQuoteRsp => "RspSubForQuoteRsp",
            ResponseKind::RspUnSubForQuoteRsp => "RspUnSubForQuoteRsp",
            ResponseKind::RtnDepthMarketData => "RtnDepthMarketData",
            ResponseKind::RtnForQuoteRsp => "RtnForQuoteRsp",
        }
    }

    /// Unsolicited stream events carry no request id and are always final.
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            ResponseKind::RtnDepthMarketData | ResponseKind::RtnForQuoteRsp
        )
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResponseKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownEvent(s.to_string()))
    }
}

/// Owned payload of a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationData {
    /// Disconnect reason code (`0x1001` read failure, `0x2001` heartbeat timeout, ...).
    Reason(i32),
    /// Milliseconds since the last packet, for heartbeat warnings.
    TimeLapse(i32),
    UserLogin(RspUserLoginField),
    UserLogout(UserLogoutField),
    Instrument(SpecificInstrumentField),
    DepthMarketData(Box<DepthMarketDataField>),
    ForQuote(ForQuoteRspField),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: ResponseKind,
    pub data: Option<NotificationData>,
    pub error: Option<RspInfoField>,
    pub request_id: Option<i32>,
    pub is_final: bool,
}

impl Notification {
    /// Connection-state event with optional scalar payload.
    pub fn signal(kind: ResponseKind, data: Option<NotificationData>) -> Self {
        Self {
            kind,
            data,
            error: None,
            request_id: None,
            is_final: true,
        }
    }

    /// Acknowledgement of a request, possibly one fragment of several.
    pub fn response(
        kind: ResponseKind,
        data: Option<NotificationData>,
        error: Option<RspInfoField>,
        request_id: i32,
        is_final: bool,
    ) -> Self {
        Self {
            kind,
            data,
            error,
            request_id: Some(request_id),
            is_final,
        }
    }

    /// Unsolicited stream event: no request id, always final.
    pub fn stream(kind: ResponseKind, data: NotificationData) -> Self {
        Self::signal(kind, Some(data))
    }

    /// True when the acknowledgement carries a non-zero native error.
    pub fn is_error(&self) -> bool {
        self.error.as_ref().map(|e| e.is_error()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in ResponseKind::ALL {
            assert_eq!(kind.as_str().parse::<ResponseKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let err = "RspQryInstrument".parse::<ResponseKind>().unwrap_err();
        assert_eq!(err, BridgeError::UnknownEvent("RspQryInstrument".to_string()));
    }

    #[test]
    fn test_stream_notification_is_final_without_request_id() {
        let n = Notification::stream(
            ResponseKind::RtnDepthMarketData,
            NotificationData::DepthMarketData(Box::default()),
        );
        assert!(n.is_final);
        assert!(n.request_id.is_none());
        assert!(n.kind.is_stream());
    }

    #[test]
    fn test_response_error_detection() {
        let ok = Notification::response(
            ResponseKind::RspUserLogin,
            None,
            Some(RspInfoField::default()),
            1,
            true,
        );
        assert!(!ok.is_error());

        let rejected = Notification::response(
            ResponseKind::RspUserLogin,
            None,
            Some(RspInfoField {
                error_id: 3,
                error_msg: "invalid login".to_string(),
            }),
            1,
            true,
        );
        assert!(rejected.is_error());
    }
}
