//! # ctp-bridge — CTP market-data session bridge for Node.js
//!
//! Exposes a blocking, callback-driven native market-data client to a host
//! that runs a single cooperative thread:
//!
//! - **Blocking calls** run on one worker thread per session, in submission
//!   order, and complete through a continuation on the host pump
//! - **Native callbacks** are deep-copied into owned notifications on the
//!   callback thread and drained by the host pump on a coalesced wakeup
//! - **Handlers** are one per event kind, invoked only by the host pump
//!
//! ## Architecture
//!
//! ```text
//! host ──submit──▶ [WorkDispatcher] ──▶ NativeSession (worker thread)
//!  ▲                                          │ MdSpi callbacks (native thread)
//!  │                                          ▼
//!  └── [host pump] ◀── completions / wakeup ── [NotificationChannel]
//! ```
//!
//! ## Usage from Rust
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctp_bridge::{MdClient, ResponseKind, SessionConfig, SimulatedGateway};
//!
//! # async fn run() -> ctp_bridge::Result<()> {
//! let config = SessionConfig {
//!     front_address: Some("tcp://180.168.146.187:10131".to_string()),
//!     ..Default::default()
//! };
//! let client = MdClient::connect(Arc::new(SimulatedGateway::new()), config).await?;
//! let mut ticks = client.events(ResponseKind::RtnDepthMarketData);
//! client.subscribe_market_data(["IF2401"]).await?;
//! while let Some(tick) = ticks.recv().await {
//!     println!("{:?}", tick.data);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Usage from Node.js (feature `napi`)
//!
//! ```javascript
//! const { CtpMd, useSimulatedGateway } = require('./ctp-bridge');
//!
//! useSimulatedGateway();
//! const md = new CtpMd({ flowDir: './flow' });
//! md.on('FrontConnected', () => md.reqUserLogin({ BrokerID: '9999' }, 1, () => {}));
//! md.on('RtnDepthMarketData', (tick) => console.log(tick.LastPrice));
//! md.createFtdcMdApi('./flow', () => {
//!   md.registerFront('tcp://180.168.146.187:10131', () => md.init(() => {}));
//! });
//! ```

pub mod bridge;
pub mod error;
pub mod executor;
pub mod logging;
pub mod native;
pub mod queue;
pub mod session;
pub mod spi;
pub mod types;

pub use error::{BridgeError, Result};
pub use native::sim::SimulatedGateway;
pub use native::{MdSpi, NativeFactory, NativeSession};
pub use session::client::MdClient;
pub use session::{Session, SessionState};
pub use types::config::SessionConfig;
pub use types::notification::{Notification, NotificationData, ResponseKind};
pub use types::request::{CallValue, Request, RequestKind};
