//! Client signal-session engine.
//!
//! A session runs as one tokio task that owns the per-connection [`Env`]:
//! the subscription table, the fragment buffer, the heartbeat and the
//! session-configuration refresh. Callers talk to it through a
//! [`SessionHandle`]; the transport feeds inbound messages in with
//! [`SessionHandle::deliver`].
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use dots_client::{
//!     request_kind::{Method, RequestKind},
//!     session::{Request, SessionHandle, SessionSettings},
//!     transport::{Reconnect, Transport},
//! };
//!
//! # async fn demo(transport: Arc<dyn Transport>, reconnect: Arc<dyn Reconnect>) {
//! let (session, _notifications) = SessionHandle::spawn(&SessionSettings::default(), transport, reconnect);
//! session.start_heartbeat(Duration::from_secs(30), 5).ok();
//! let response = session
//!     .send(Request::new(RequestKind::SessionConfiguration, Method::Get).with_query(["sid=123"]))
//!     .await;
//! # drop(response);
//! # }
//! ```

mod env;
mod errors;
mod exchange;
pub mod fragment;
mod handle;
mod heartbeat;
mod notification;
mod refresh;
mod request;
mod runner;

pub use env::{Env, EnvSnapshot, RequestQuery, RetryProfile, SessionSettings, query_params_to_string};
pub use errors::SessionError;
pub use fragment::{BlockStatus, FragmentBuffer, FragmentError, FragmentKey, MAX_REASSEMBLED_SIZE};
pub use handle::{Notifications, SessionHandle};
pub use request::{Notification, Payload, Request, RequestOptions, Response, create_message};
