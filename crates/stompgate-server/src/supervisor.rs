//! The connection supervisor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use stompgate_amqp::{ChannelAdapter, MessageBroker};
use stompgate_config::{GatewayConfig, ReconnectConfig};
use stompgate_core::{Frame, StompCodec, Transmission};
use stompgate_observability::{BridgePhase, BridgeState};
use stompgate_router::Router;
use stompgate_session::Session;

use crate::backoff::Backoff;
use crate::connection::{handle_connection, ConnectionContext};
use crate::error::ServerError;
use crate::server_info;

/// How often the watchdog checks the broker connection.
const BROKER_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Accepts client connections and owns the broker connection's lifecycle.
pub struct Supervisor {
    config: GatewayConfig,
    broker: Arc<ChannelAdapter>,
    router: Router,
    bridge: BridgeState,
}

impl Supervisor {
    /// Connect to the broker and get ready to serve.
    pub async fn start(config: GatewayConfig, bridge: BridgeState) -> Result<Self, ServerError> {
        let broker = Arc::new(ChannelAdapter::connect(config.broker.clone()).await?);
        bridge.set_broker_connected(true);
        let router = Router::new(config.broker.topic_exchange.clone());
        Ok(Self {
            config,
            broker,
            router,
            bridge,
        })
    }

    /// Bind the STOMP listener and serve until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let bind_addr = self.config.server.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(addr = %bind_addr, "STOMP listener ready");
        self.bridge.set_phase(BridgePhase::Serving);

        let watchdog = tokio::spawn(watch_broker(
            Arc::clone(&self.broker),
            self.config.reconnect.clone(),
            self.bridge.clone(),
        ));

        let active = Arc::new(AtomicUsize::new(0));
        let result = loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => break Err(ServerError::from(e)),
            };

            if active.load(Ordering::SeqCst) >= self.config.server.max_connections {
                warn!(%peer, "connection limit reached, rejecting");
                tokio::spawn(reject_connection(stream));
                continue;
            }

            debug!(%peer, "connection accepted");
            active.fetch_add(1, Ordering::SeqCst);
            self.bridge.session_opened();

            let session = Session::new(server_info(), self.config.heartbeat.clone());
            let ctx = ConnectionContext {
                broker: Arc::clone(&self.broker) as Arc<dyn MessageBroker>,
                router: self.router.clone(),
                bridge: self.bridge.clone(),
                queue_size: self.config.server.session_queue_size,
                broker_retry_attempts: self.config.reconnect.max_retries,
            };
            let active = Arc::clone(&active);
            let bridge = self.bridge.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, session, ctx).await {
                    warn!(%peer, error = %e, "connection ended with an error");
                } else {
                    debug!(%peer, "connection closed");
                }
                active.fetch_sub(1, Ordering::SeqCst);
                bridge.session_closed();
            });
        };

        watchdog.abort();
        result
    }
}

/// Watch the broker connection; reconnect with bounded backoff and declare
/// the bridge degraded once the budget is spent. Client sessions stay up the
/// whole time; they wait out the outage in their own retry loops.
async fn watch_broker(broker: Arc<ChannelAdapter>, reconnect: ReconnectConfig, bridge: BridgeState) {
    loop {
        tokio::time::sleep(BROKER_CHECK_INTERVAL).await;
        if broker.is_connected().await {
            continue;
        }

        warn!("lost the broker connection");
        bridge.set_broker_connected(false);

        let mut backoff = Backoff::new(reconnect.clone());
        loop {
            match backoff.next_delay() {
                Some(delay) => {
                    debug!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "scheduling broker reconnect");
                    tokio::time::sleep(delay).await;
                    match broker.reconnect().await {
                        Ok(()) => {
                            info!(attempts = backoff.attempt(), "broker connection restored");
                            bridge.set_broker_connected(true);
                            bridge.set_phase(BridgePhase::Serving);
                            break;
                        }
                        Err(e) => warn!(error = %e, "reconnect attempt failed"),
                    }
                }
                None => {
                    // Budget spent. Degrade readiness, but keep probing at
                    // the cap so the bridge can still come back.
                    if bridge.phase() != BridgePhase::Degraded {
                        error!("broker retry budget exhausted, bridge degraded");
                        bridge.set_phase(BridgePhase::Degraded);
                    }
                    tokio::time::sleep(Duration::from_millis(reconnect.max_delay_ms)).await;
                    if broker.reconnect().await.is_ok() {
                        info!("broker connection restored after degradation");
                        bridge.set_broker_connected(true);
                        bridge.set_phase(BridgePhase::Serving);
                        break;
                    }
                }
            }
        }
    }
}

/// Tell an over-capacity client why it is being dropped.
async fn reject_connection<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = Framed::new(stream, StompCodec::new());
    let frame = Frame::error(
        "server at capacity",
        "connection limit reached, try again later",
    );
    let _ = framed.send(Transmission::Frame(frame)).await;
    let _ = SinkExt::<Transmission>::close(&mut framed).await;
}
