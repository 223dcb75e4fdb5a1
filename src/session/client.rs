//! Awaitable facade over [`Session`].
//!
//! Each method submits one request with a continuation that resolves a
//! `oneshot`, then awaits it. Argument and lifecycle errors still surface
//! before anything is enqueued.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::native::NativeFactory;
use crate::session::Session;
use crate::types::config::SessionConfig;
use crate::types::fields::{FensUserInfoField, ReqUserLoginField, UserLogoutField};
use crate::types::notification::{Notification, ResponseKind};
use crate::types::request::{CallValue, Request};

pub struct MdClient {
    session: Session,
    next_request_id: AtomicI32,
}

impl MdClient {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            next_request_id: AtomicI32::new(1),
        }
    }

    /// Create a session, construct the native handle, register the configured
    /// front (the name server wins when both are set) and start it.
    pub async fn connect(factory: Arc<dyn NativeFactory>, config: SessionConfig) -> Result<Self> {
        let flow_dir = config.flow_dir().to_string();
        let name_server = config.name_server_address.clone();
        let front = config.front_address.clone();

        let client = Self::new(Session::new(factory, config)?);
        client.create(&flow_dir).await?;

        match (name_server, front) {
            (Some(address), _) => client.register_name_server(&address).await?,
            (None, Some(address)) => client.register_front(&address).await?,
            (None, None) => {
                return Err(BridgeError::Configuration(
                    "either frontAddress or nameServerAddress is required".to_string(),
                ))
            }
        }

        client.init().await?;
        info!(session = client.session.id(), "Market-data client connected");
        Ok(client)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Next value for a login/logout `request_id`.
    pub fn next_request_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, request: Request, request_id: Option<i32>) -> Result<CallValue> {
        let (tx, rx) = oneshot::channel();
        self.session.submit(
            request,
            request_id,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )?;
        rx.await.map_err(|_| BridgeError::Disconnected)?
    }

    pub async fn create(&self, flow_dir: &str) -> Result<()> {
        self.request(
            Request::CreateSession {
                flow_dir: flow_dir.to_string(),
            },
            None,
        )
        .await
        .map(drop)
    }

    pub async fn init(&self) -> Result<()> {
        self.request(Request::Init, None).await.map(drop)
    }

    pub async fn register_front(&self, address: &str) -> Result<()> {
        self.request(
            Request::RegisterFront {
                address: address.to_string(),
            },
            None,
        )
        .await
        .map(drop)
    }

    pub async fn register_name_server(&self, address: &str) -> Result<()> {
        self.request(
            Request::RegisterNameServer {
                address: address.to_string(),
            },
            None,
        )
        .await
        .map(drop)
    }

    pub async fn register_fens_user_info(&self, field: FensUserInfoField) -> Result<()> {
        self.request(Request::RegisterFensUserInfo { field }, None)
            .await
            .map(drop)
    }

    pub async fn api_version(&self) -> Result<String> {
        text(self.request(Request::GetApiVersion, None).await?)
    }

    pub async fn trading_day(&self) -> Result<String> {
        text(self.request(Request::GetTradingDay, None).await?)
    }

    pub async fn subscribe_market_data<I, S>(&self, instrument_ids: I) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let instrument_ids = instrument_ids.into_iter().map(Into::into).collect();
        status(
            self.request(Request::SubscribeMarketData { instrument_ids }, None)
                .await?,
        )
    }

    pub async fn unsubscribe_market_data<I, S>(&self, instrument_ids: I) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let instrument_ids = instrument_ids.into_iter().map(Into::into).collect();
        status(
            self.request(Request::UnsubscribeMarketData { instrument_ids }, None)
                .await?,
        )
    }

    pub async fn subscribe_for_quote_rsp<I, S>(&self, instrument_ids: I) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let instrument_ids = instrument_ids.into_iter().map(Into::into).collect();
        status(
            self.request(Request::SubscribeForQuoteRsp { instrument_ids }, None)
                .await?,
        )
    }

    pub async fn unsubscribe_for_quote_rsp<I, S>(&self, instrument_ids: I) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let instrument_ids = instrument_ids.into_iter().map(Into::into).collect();
        status(
            self.request(Request::UnsubscribeForQuoteRsp { instrument_ids }, None)
                .await?,
        )
    }

    pub async fn login(&self, field: ReqUserLoginField, request_id: i32) -> Result<i32> {
        status(
            self.request(Request::UserLogin { field }, Some(request_id))
                .await?,
        )
    }

    pub async fn logout(&self, field: UserLogoutField, request_id: i32) -> Result<i32> {
        status(
            self.request(Request::UserLogout { field }, Some(request_id))
                .await?,
        )
    }

    pub async fn exit(&self) -> Result<()> {
        self.request(Request::Exit, None).await.map(drop)
    }

    /// Route every `kind` notification into a channel. Replaces any handler
    /// already registered for `kind`.
    pub fn events(&self, kind: ResponseKind) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.session.on(kind, move |notification| {
            let _ = tx.send(notification);
        });
        rx
    }

    pub fn events_named(&self, event_name: &str) -> Result<mpsc::UnboundedReceiver<Notification>> {
        let kind: ResponseKind = event_name.parse()?;
        Ok(self.events(kind))
    }
}

fn text(value: CallValue) -> Result<String> {
    match value {
        CallValue::Text(s) => Ok(s),
        other => Err(unexpected(other)),
    }
}

fn status(value: CallValue) -> Result<i32> {
    value.as_status().ok_or_else(|| unexpected(value))
}

fn unexpected(value: CallValue) -> BridgeError {
    BridgeError::CallFailed {
        status: -1,
        message: format!("unexpected return value: {:?}", value),
    }
}
