//! Notification producer — runs on the native callback thread.
//!
//! Converts each callback shape into an owned `Notification` and publishes
//! it. Everything borrowed from the callback is cloned before `publish`, so
//! no native buffer outlives the callback that lent it.

use crate::native::MdSpi;
use crate::spi::channel::NotificationChannel;
use crate::types::fields::{
    DepthMarketDataField, ForQuoteRspField, RspInfoField, RspUserLoginField,
    SpecificInstrumentField, UserLogoutField,
};
use crate::types::notification::{Notification, NotificationData, ResponseKind};
use std::sync::Arc;

pub struct NotificationProducer {
    channel: Arc<NotificationChannel>,
}

impl NotificationProducer {
    pub fn new(channel: Arc<NotificationChannel>) -> Self {
        Self { channel }
    }

    fn response(
        &self,
        kind: ResponseKind,
        data: Option<NotificationData>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        self.channel.publish(Notification::response(
            kind,
            data,
            error.cloned(),
            request_id,
            is_last,
        ));
    }

    fn instrument_response(
        &self,
        kind: ResponseKind,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        let data = data.cloned().map(NotificationData::Instrument);
        self.response(kind, data, error, request_id, is_last);
    }
}

impl MdSpi for NotificationProducer {
    fn on_front_connected(&self) {
        self.channel
            .publish(Notification::signal(ResponseKind::FrontConnected, None));
    }

    fn on_front_disconnected(&self, reason: i32) {
        self.channel.publish(Notification::signal(
            ResponseKind::FrontDisconnected,
            Some(NotificationData::Reason(reason)),
        ));
    }

    fn on_heart_beat_warning(&self, time_lapse: i32) {
        self.channel.publish(Notification::signal(
            ResponseKind::HeartBeatWarning,
            Some(NotificationData::TimeLapse(time_lapse)),
        ));
    }

    fn on_rsp_user_login(
        &self,
        data: Option<&RspUserLoginField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        let data = data.cloned().map(NotificationData::UserLogin);
        self.response(ResponseKind::RspUserLogin, data, error, request_id, is_last);
    }

    fn on_rsp_user_logout(
        &self,
        data: Option<&UserLogoutField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        let data = data.cloned().map(NotificationData::UserLogout);
        self.response(ResponseKind::RspUserLogout, data, error, request_id, is_last);
    }

    fn on_rsp_error(&self, error: Option<&RspInfoField>, request_id: i32, is_last: bool) {
        self.response(ResponseKind::RspError, None, error, request_id, is_last);
    }

    fn on_rsp_sub_market_data(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        self.instrument_response(ResponseKind::RspSubMarketData, data, error, request_id, is_last);
    }

    fn on_rsp_unsub_market_data(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        self.instrument_response(
            ResponseKind::RspUnSubMarketData,
            data,
            error,
            request_id,
            is_last,
        );
    }

    fn on_rsp_sub_for_quote_rsp(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        self.instrument_response(
            ResponseKind::RspSubForQuoteRsp,
            data,
            error,
            request_id,
            is_last,
        );
    }

    fn on_rsp_unsub_for_quote_rsp(
        &self,
        data: Option<&SpecificInstrumentField>,
        error: Option<&RspInfoField>,
        request_id: i32,
        is_last: bool,
    ) {
        self.instrument_response(
            ResponseKind::RspUnSubForQuoteRsp,
            data,
            error,
            request_id,
            is_last,
        );
    }

    fn on_rtn_depth_market_data(&self, data: &DepthMarketDataField) {
        self.channel.publish(Notification::stream(
            ResponseKind::RtnDepthMarketData,
            NotificationData::DepthMarketData(Box::new(data.clone())),
        ));
    }

    fn on_rtn_for_quote_rsp(&self, data: &ForQuoteRspField) {
        self.channel.publish(Notification::stream(
            ResponseKind::RtnForQuoteRsp,
            NotificationData::ForQuote(data.clone()),
        ));
    }
}
