//! Tokio runtime for the signal-channel client.
//!
//! The daemon keeps one session alive per connection and rebuilds both when
//! the heartbeat declares the server unreachable.

#![expect(
    clippy::print_stdout,
    reason = "the request subcommand prints the server's answer"
)]

use std::{fs, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use ortho_config::load_and_merge_subcommand_for;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{error, info, warn};

use super::{Cli, ClientConfig, Commands, RequestArgs};
use crate::{
    message::Observe,
    payload::SessionConfigMode,
    request_kind::{Method, RequestKind},
    session::{Notification, Notifications, Request, Response, RetryProfile, SessionHandle, SessionSettings},
    transport::{Reconnect, UdpTransport, pump_inbound},
};

/// Largest Block2 size exponent (1024-byte blocks).
const MAX_BLOCK_SZX: u8 = 6;

/// Parse CLI arguments and execute the requested action.
///
/// # Errors
///
/// Returns any error encountered while merging configuration or while running
/// the requested command or daemon.
pub async fn dispatch(cli: Cli) -> Result<()> {
    let Cli { config, command } = cli;
    if let Some(command) = command {
        run_command(command, &config).await
    } else {
        run_daemon(config).await
    }
}

/// Execute a one-shot command.
///
/// # Errors
///
/// Propagates failures from configuration merging, connection setup or the
/// request itself.
pub async fn run_command(command: Commands, cfg: &ClientConfig) -> Result<()> {
    match command {
        Commands::Request(args) => {
            let args = load_and_merge_subcommand_for::<RequestArgs>(&args)?;
            run_request(&args, cfg).await
        }
    }
}

async fn run_request(args: &RequestArgs, cfg: &ClientConfig) -> Result<()> {
    let request = build_request(args)?;
    let settings = settings_from_config(cfg)?;
    let connection = Connection::open(cfg, &settings, Arc::new(LogReconnect)).await?;

    let response = connection.session.send(request).await?;
    print_response(&response);
    connection.close();
    Ok(())
}

fn print_response(response: &Response) {
    println!("{}", response.code);
    if let Some(body) = response.payload.render() {
        println!("{body}");
    }
}

/// Build a [`Request`] from `request` subcommand arguments.
///
/// # Errors
///
/// Returns an error when the kind or method is missing or unknown, or when
/// the body file cannot be read or encoded.
pub fn build_request(args: &RequestArgs) -> Result<Request> {
    let kind: RequestKind = args
        .kind
        .as_deref()
        .ok_or_else(|| anyhow!("missing request kind"))?
        .parse()?;
    let method: Method = args
        .method
        .as_deref()
        .ok_or_else(|| anyhow!("missing request method"))?
        .parse()?;

    let mut request = Request::new(kind, method);
    if let Some(query) = &args.query {
        request = request.with_query(query.split(',').map(str::trim).filter(|p| !p.is_empty()));
    }
    request.options.observe = args.observe;
    if let Some(tag) = &args.if_match {
        request = request.with_if_match(tag.as_bytes().to_vec());
    }
    if args.non_confirmable == Some(true) {
        request = request.non_confirmable();
    }
    if let Some(path) = &args.body {
        let text = fs::read_to_string(path).with_context(|| format!("reading request body {path}"))?;
        let body: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("parsing request body {path}"))?;
        request = request.with_body(&body)?;
    }
    Ok(request)
}

/// Translate the static configuration into session settings.
///
/// # Errors
///
/// Returns an error for an unknown session-configuration mode or an
/// out-of-range block size.
pub fn settings_from_config(cfg: &ClientConfig) -> Result<SessionSettings> {
    let session_config_mode: SessionConfigMode = cfg.session_config_mode.parse().map_err(anyhow::Error::msg)?;
    if let Some(szx) = cfg.initial_block_size.filter(|szx| *szx > MAX_BLOCK_SZX) {
        return Err(anyhow!("initial block size {szx} exceeds {MAX_BLOCK_SZX}"));
    }
    Ok(SessionSettings {
        confirmable: RetryProfile::new(
            Duration::from_secs(cfg.confirmable_interval),
            cfg.confirmable_retries,
            Duration::from_secs(cfg.confirmable_timeout),
        ),
        non_confirmable: RetryProfile::new(
            Duration::from_secs(cfg.non_confirmable_interval),
            cfg.non_confirmable_retries,
            Duration::from_secs(cfg.non_confirmable_timeout),
        ),
        interval_before_max_age: Duration::from_secs(cfg.interval_before_max_age),
        initial_block_size: cfg.initial_block_size,
        session_config_mode,
    })
}

/// Run the client until a termination signal, reconnecting whenever the
/// heartbeat gives up on the server.
///
/// # Errors
///
/// Returns an error for invalid settings or when the first connection
/// cannot be opened.
pub async fn run_daemon(cfg: ClientConfig) -> Result<()> {
    let settings = settings_from_config(&cfg)?;
    let signal = Arc::new(NotifyReconnect::default());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut connection = Connection::open(&cfg, &settings, signal.clone()).await?;
    loop {
        bootstrap(&connection.session, &cfg).await;
        let reconnect = serve(&mut connection.notifications, &signal, &mut shutdown).await;
        connection.close();
        if !reconnect {
            info!("shutdown signal received");
            return Ok(());
        }
        warn!(server = %cfg.server, "server unreachable; reconnecting");
        connection = Connection::open(&cfg, &settings, signal.clone()).await?;
    }
}

/// Pump notifications until the session needs a reconnect (`true`) or the
/// process should stop (`false`).
async fn serve<F>(notifications: &mut Notifications, signal: &NotifyReconnect, shutdown: &mut F) -> bool
where
    F: Future<Output = ()> + Unpin,
{
    loop {
        tokio::select! {
            () = &mut *shutdown => return false,
            () = signal.notified() => return true,
            notification = notifications.recv() => match notification {
                Some(notification) => log_notification(&notification),
                None => {
                    error!("session runner stopped");
                    return true;
                }
            },
        }
    }
}

fn log_notification(notification: &Notification) {
    info!(
        token = %notification.token,
        code = %notification.code,
        observe = ?notification.observe,
        body = notification.payload.render().as_deref().unwrap_or(""),
        "notification"
    );
}

/// Issue the start-up requests selected by the configuration.
async fn bootstrap(session: &SessionHandle, cfg: &ClientConfig) {
    if let Some(sid) = cfg.sid {
        let request = Request::new(RequestKind::SessionConfiguration, Method::Get).with_query([format!("sid={sid}")]);
        log_outcome("session configuration", session.send(request).await);
    }
    if let Some(cuid) = &cfg.cuid {
        let request = Request::new(RequestKind::Mitigation, Method::Get)
            .with_query([format!("cuid={cuid}")])
            .with_observe(Observe::Register);
        log_outcome("mitigation subscription", session.send(request).await);
    }
}

fn log_outcome<E: std::fmt::Display>(what: &str, outcome: Result<Response, E>) {
    match outcome {
        Ok(response) => info!(code = %response.code, max_age = ?response.max_age, "{what} answered"),
        Err(error) => warn!(error = %error, "{what} failed"),
    }
}

/// One transport and the session running over it.
struct Connection {
    session: SessionHandle,
    notifications: Notifications,
    pump: JoinHandle<()>,
}

impl Connection {
    async fn open(cfg: &ClientConfig, settings: &SessionSettings, reconnect: Arc<dyn Reconnect>) -> Result<Self> {
        let (transport, inbound) = UdpTransport::connect(&cfg.server)
            .await
            .with_context(|| format!("connecting to {}", cfg.server))?;
        info!(server = %transport.peer(), "connected");
        let (session, notifications) = SessionHandle::spawn(settings, Arc::new(transport), reconnect);
        let pump = tokio::spawn(pump_inbound(inbound, session.clone()));
        session.start_heartbeat(Duration::from_secs(cfg.heartbeat_interval), cfg.missing_hb_allowed)?;
        Ok(Self {
            session,
            notifications,
            pump,
        })
    }

    fn close(self) {
        if let Err(error) = self.session.shutdown() {
            warn!(error = %error, "session already stopped");
        }
        self.pump.abort();
    }
}

/// Reconnect procedure that wakes the daemon loop.
#[derive(Debug, Default)]
struct NotifyReconnect {
    notify: Notify,
}

impl NotifyReconnect {
    async fn notified(&self) { self.notify.notified().await; }
}

impl Reconnect for NotifyReconnect {
    fn reconnect(&self) { self.notify.notify_one(); }
}

/// Reconnect procedure for one-shot commands, which never retry.
struct LogReconnect;

impl Reconnect for LogReconnect {
    fn reconnect(&self) { warn!("server stopped answering heartbeats"); }
}

/// Waits for a shutdown signal, completing when termination is requested.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            error!(error = %err, "failed to listen for Ctrl-C");
                        }
                    },
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            server: "127.0.0.1:4646".to_owned(),
            confirmable_interval: 2,
            confirmable_retries: 3,
            confirmable_timeout: 20,
            non_confirmable_interval: 2,
            non_confirmable_retries: 0,
            non_confirmable_timeout: 10,
            interval_before_max_age: 10,
            initial_block_size: None,
            session_config_mode: "idle".to_owned(),
            heartbeat_interval: 30,
            missing_hb_allowed: 5,
            sid: None,
            cuid: None,
        }
    }

    #[rstest]
    fn settings_match_defaults() {
        let settings = settings_from_config(&config()).expect("settings");
        assert_eq!(settings, SessionSettings::default());
    }

    #[rstest]
    #[case("mitigating", None, true)]
    #[case("idle", Some(6), true)]
    #[case("idle", Some(7), false)]
    #[case("bogus", None, false)]
    fn settings_validation(#[case] mode: &str, #[case] szx: Option<u8>, #[case] ok: bool) {
        let mut cfg = config();
        cfg.session_config_mode = mode.to_owned();
        cfg.initial_block_size = szx;
        assert_eq!(settings_from_config(&cfg).is_ok(), ok);
    }

    #[rstest]
    fn builds_request_from_args() {
        let args = RequestArgs {
            kind: Some("mitigation_request".to_owned()),
            method: Some("GET".to_owned()),
            query: Some("cuid=abc, mid=123".to_owned()),
            observe: Some(0),
            if_match: Some(String::new()),
            body: None,
            non_confirmable: Some(true),
        };
        let request = build_request(&args).expect("request");
        assert_eq!(request.kind, RequestKind::Mitigation);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_params, ["cuid=abc", "mid=123"]);
        assert_eq!(request.options.observe, Some(0));
        assert_eq!(request.options.if_match, Some(Vec::new()));
        assert!(!request.confirmable);
    }

    #[rstest]
    #[case(None, Some("GET"))]
    #[case(Some("mitigation_request"), None)]
    #[case(Some("alias"), Some("GET"))]
    #[case(Some("mitigation_request"), Some("PATCH"))]
    fn rejects_incomplete_requests(#[case] kind: Option<&str>, #[case] method: Option<&str>) {
        let args = RequestArgs {
            kind: kind.map(str::to_owned),
            method: method.map(str::to_owned),
            ..RequestArgs::default()
        };
        assert!(build_request(&args).is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn notify_reconnect_wakes_waiter() {
        let signal = NotifyReconnect::default();
        signal.reconnect();
        tokio::time::timeout(Duration::from_secs(1), signal.notified())
            .await
            .expect("woken");
    }
}
