#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relay_domain::ConnectionState;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::Message;

pub(crate) type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay between a closed or failed session and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
	pub url: String,
	pub reconnect_delay: Duration,
}

impl ConnectionConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			reconnect_delay: DEFAULT_RECONNECT_DELAY,
		}
	}

	pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
		self.reconnect_delay = delay;
		self
	}
}

/// Why a socket session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
	/// `disconnect()` or drop of the owning connection.
	Requested,
	/// The server closed the socket or the stream ended.
	Remote,
	/// Read or write error on an open socket.
	Error,
	/// The socket could not be opened.
	ConnectFailed,
	/// The session asked to reconnect to the configured URL.
	Reconnect,
	/// The session asked to move to a server-provided URL.
	Migrating,
}

/// Instruction returned by a [`Session`] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
	/// Queue a text frame on the live socket.
	Send(String),
	/// Close the socket and reconnect right away, to `url` for the next attempt
	/// only when given, otherwise to the configured URL.
	Reconnect { url: Option<String> },
}

/// Protocol state machine driven by a [`Connection`].
///
/// All callbacks run on the connection's worker task and must not block.
pub trait Session: Send + Sync + 'static {
	/// The socket is open.
	fn on_open(&self) -> Vec<SessionAction>;

	/// One inbound text frame.
	fn handle_frame(&self, frame: &str) -> Vec<SessionAction>;

	/// The socket closed or a connect attempt failed.
	fn on_close(&self, reason: CloseReason);
}

/// The worker generation allowed to publish, and its outbound queue.
#[derive(Default)]
struct Current {
	generation: u64,
	outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
	state: watch::Sender<ConnectionState>,
	current: Mutex<Current>,
	/// Held by a worker for its whole run, so sessions never overlap.
	running: Arc<tokio::sync::Mutex<()>>,
}

impl Shared {
	/// Start a new generation; older workers can no longer publish.
	fn advance(&self) -> u64 {
		let mut current = self.current.lock();
		current.generation = current.generation.wrapping_add(1);
		current.outbound = None;
		self.state.send_replace(ConnectionState::Connecting);
		current.generation
	}

	fn set_state(&self, generation: u64, state: ConnectionState) {
		let current = self.current.lock();
		if current.generation == generation {
			self.state.send_replace(state);
		}
	}

	fn set_outbound(&self, generation: u64, outbound: Option<mpsc::UnboundedSender<String>>) {
		let mut current = self.current.lock();
		if current.generation == generation {
			current.outbound = outbound;
		}
	}
}

struct Worker {
	generation: u64,
	stop: watch::Sender<bool>,
	handle: JoinHandle<()>,
}

/// One persistent WebSocket session with automatic reconnect.
///
/// `connect` starts a worker task that keeps a socket open until `disconnect`
/// is called or the connection is dropped. Every session end, whatever the
/// cause, is followed by `reconnect_delay` before the next attempt, except for
/// session-requested reconnects which retry immediately.
///
/// A `connect` issued while a `disconnect` is still draining the previous
/// worker starts a new worker that opens its socket only after the old one
/// has fully closed.
pub struct Connection<S: Session> {
	id: String,
	config: ConnectionConfig,
	session: Arc<S>,
	shared: Arc<Shared>,
	worker: Mutex<Option<Worker>>,
}

impl<S: Session> Connection<S> {
	pub fn new(config: ConnectionConfig, session: S) -> Self {
		let (state, _) = watch::channel(ConnectionState::Closed);
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			config,
			session: Arc::new(session),
			shared: Arc::new(Shared {
				state,
				current: Mutex::new(Current::default()),
				running: Arc::new(tokio::sync::Mutex::new(())),
			}),
			worker: Mutex::new(None),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	pub fn session(&self) -> &Arc<S> {
		&self.session
	}

	/// Start the worker. No-op while a worker is already running.
	///
	/// Must be called from within a tokio runtime.
	pub fn connect(&self) {
		let mut worker = self.worker.lock();
		if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
			return;
		}

		let runtime = match tokio::runtime::Handle::try_current() {
			Ok(rt) => rt,
			Err(_) => {
				warn!(connection_id = %self.id, url = %self.config.url, "connect called outside of a tokio runtime");
				return;
			}
		};

		let (stop, stop_rx) = watch::channel(false);
		let generation = self.shared.advance();
		let handle = runtime.spawn(run_loop(
			self.id.clone(),
			generation,
			self.config.clone(),
			Arc::clone(&self.session),
			Arc::clone(&self.shared),
			stop_rx,
		));
		*worker = Some(Worker {
			generation,
			stop,
			handle,
		});
	}

	/// Stop the worker and wait for it to exit. Safe to call repeatedly.
	pub async fn disconnect(&self) {
		let worker = self.worker.lock().take();
		let Some(worker) = worker else {
			return;
		};

		let _ = worker.stop.send(true);
		if let Err(e) = worker.handle.await
			&& e.is_panic()
		{
			warn!(connection_id = %self.id, error = ?e, "connection worker panicked");
		}
		// No-op when connect() started a newer worker meanwhile.
		self.shared.set_state(worker.generation, ConnectionState::Closed);
		info!(connection_id = %self.id, url = %self.config.url, "connection stopped");
	}

	/// Queue a text frame on the live socket. Returns `false` if there is none.
	pub fn send(&self, text: impl Into<String>) -> bool {
		let current = self.shared.current.lock();
		match current.outbound.as_ref() {
			Some(tx) => tx.send(text.into()).is_ok(),
			None => false,
		}
	}

	pub fn state(&self) -> ConnectionState {
		*self.shared.state.borrow()
	}

	pub fn is_connected(&self) -> bool {
		self.state() == ConnectionState::Open
	}

	pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
		self.shared.state.subscribe()
	}
}

impl<S: Session> Drop for Connection<S> {
	fn drop(&mut self) {
		if let Some(worker) = self.worker.get_mut().take() {
			let _ = worker.stop.send(true);
		}
	}
}

async fn run_loop<S: Session>(
	id: String,
	generation: u64,
	config: ConnectionConfig,
	session: Arc<S>,
	shared: Arc<Shared>,
	mut stop: watch::Receiver<bool>,
) {
	// Wait for a previous worker that is still shutting down.
	let _running = tokio::select! {
		guard = Arc::clone(&shared.running).lock_owned() => guard,
		_ = stop.wait_for(|stopped| *stopped) => return,
	};

	let mut next_url: Option<String> = None;

	loop {
		if *stop.borrow() {
			break;
		}

		let url = next_url.take().unwrap_or_else(|| config.url.clone());
		shared.set_state(generation, ConnectionState::Connecting);
		debug!(connection_id = %id, url = %url, "connecting");

		let connected = tokio::select! {
			res = tokio_tungstenite::connect_async(url.as_str()) => res,
			_ = stop.changed() => break,
		};

		let reason = match connected {
			Ok((ws, _resp)) => {
				info!(connection_id = %id, url = %url, "connection opened");
				run_socket(&id, generation, ws, session.as_ref(), &shared, &mut stop, &mut next_url).await
			}
			Err(e) => {
				warn!(connection_id = %id, url = %url, error = %e, "connection failed");
				CloseReason::ConnectFailed
			}
		};

		shared.set_outbound(generation, None);
		shared.set_state(generation, ConnectionState::Closed);
		session.on_close(reason);

		match reason {
			CloseReason::Requested => break,
			CloseReason::Reconnect | CloseReason::Migrating => {
				info!(connection_id = %id, ?reason, "reconnecting now");
				continue;
			}
			_ => {}
		}

		info!(
			connection_id = %id,
			?reason,
			delay_secs = config.reconnect_delay.as_secs_f64(),
			"connection closed; reconnecting after delay"
		);
		tokio::select! {
			_ = sleep(config.reconnect_delay) => {}
			_ = stop.changed() => break,
		}
	}

	shared.set_outbound(generation, None);
	shared.set_state(generation, ConnectionState::Closed);
}

async fn run_socket<S: Session>(
	id: &str,
	generation: u64,
	mut ws: Ws,
	session: &S,
	shared: &Shared,
	stop: &mut watch::Receiver<bool>,
	next_url: &mut Option<String>,
) -> CloseReason {
	let (tx, mut rx) = mpsc::unbounded_channel::<String>();
	shared.set_outbound(generation, Some(tx));
	shared.set_state(generation, ConnectionState::Open);

	let mut reason = apply_actions(&mut ws, session.on_open(), next_url).await;

	while reason.is_none() {
		tokio::select! {
			_ = stop.changed() => {
				reason = Some(CloseReason::Requested);
			}

			Some(out) = rx.recv() => {
				if let Err(e) = ws.send(Message::text(out)).await {
					warn!(connection_id = %id, error = %e, "websocket send failed");
					reason = Some(CloseReason::Error);
				}
			}

			msg = ws.next() => {
				let Some(msg) = msg else {
					reason = Some(CloseReason::Remote);
					continue;
				};

				match msg {
					Ok(Message::Text(t)) => {
						let actions = session.handle_frame(t.as_str());
						reason = apply_actions(&mut ws, actions, next_url).await;
					}
					Ok(Message::Ping(p)) => {
						let _ = ws.send(Message::Pong(p)).await;
					}
					Ok(Message::Close(frame)) => {
						debug!(connection_id = %id, ?frame, "close frame received");
						reason = Some(CloseReason::Remote);
					}
					Ok(_) => {}
					Err(e) => {
						warn!(connection_id = %id, error = %e, "websocket read error");
						reason = Some(CloseReason::Error);
					}
				}
			}
		}
	}

	shared.set_outbound(generation, None);
	shared.set_state(generation, ConnectionState::Closing);
	let _ = ws.close(None).await;
	reason.unwrap_or(CloseReason::Remote)
}

async fn apply_actions(ws: &mut Ws, actions: Vec<SessionAction>, next_url: &mut Option<String>) -> Option<CloseReason> {
	for action in actions {
		match action {
			SessionAction::Send(text) => {
				if let Err(e) = ws.send(Message::text(text)).await {
					warn!(error = %e, "websocket send failed");
					return Some(CloseReason::Error);
				}
			}
			SessionAction::Reconnect { url: Some(url) } => {
				*next_url = Some(url);
				return Some(CloseReason::Migrating);
			}
			SessionAction::Reconnect { url: None } => {
				*next_url = None;
				return Some(CloseReason::Reconnect);
			}
		}
	}
	None
}
