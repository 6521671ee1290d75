//! The per-connection session loop.
//!
//! One task per client connection. The loop multiplexes four sources:
//! inbound transmissions from the socket, deliveries pumped in from the
//! session's broker consumers, the outgoing heartbeat tick, and the client
//! liveness deadline. Frames within one session are processed in strict
//! receipt order; nothing here is shared across sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use stompgate_amqp::{BrokerError, Delivery, DeliverySettler, MessageBroker};
use stompgate_core::{Frame, StompCodec, Transmission};
use stompgate_observability::{BridgePhase, BridgeState};
use stompgate_router::{RouteError, Router};
use stompgate_session::{AckMode, Session, SessionEvent, SessionState, Subscription};

use crate::error::ServerError;

/// Pause between broker retries while the supervisor reconnects.
const BROKER_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Everything a connection task needs besides its socket and session.
#[derive(Clone)]
pub struct ConnectionContext {
    pub broker: Arc<dyn MessageBroker>,
    pub router: Router,
    pub bridge: BridgeState,
    /// Bound on deliveries buffered between the consumer pumps and the loop.
    pub queue_size: usize,
    /// How many times a broker operation waits out an outage before the
    /// failure is surfaced to the session.
    pub broker_retry_attempts: u32,
}

enum Flow {
    Continue,
    Closed,
}

enum BridgeOpError {
    Route(RouteError),
    Broker(BrokerError),
}

type FrameSink<S> = SplitSink<Framed<S, StompCodec>, Transmission>;

/// Run one client connection to completion.
pub async fn handle_connection<S>(
    stream: S,
    mut session: Session,
    ctx: ConnectionContext,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, StompCodec::new());
    let (mut sink, mut frames): (FrameSink<S>, SplitStream<Framed<S, StompCodec>>) =
        framed.split();

    let (delivery_tx, mut delivery_rx) = mpsc::channel::<(String, Delivery)>(ctx.queue_size);
    let mut settlers: HashMap<String, Arc<dyn DeliverySettler>> = HashMap::new();
    let mut pumps: Vec<JoinHandle<()>> = Vec::new();

    let mut send_ticker: Option<Interval> = None;
    let mut liveness_window: Option<Duration> = None;
    let mut last_inbound = Instant::now();

    let outcome = loop {
        tokio::select! {
            inbound = frames.next() => match inbound {
                Some(Ok(Transmission::Heartbeat)) => {
                    last_inbound = Instant::now();
                }
                Some(Ok(Transmission::Frame(frame))) => {
                    last_inbound = Instant::now();
                    let events = session.handle_frame(frame);
                    let flow = process_events(
                        events, &mut session, &mut sink, &mut settlers,
                        &delivery_tx, &mut pumps, &ctx,
                    ).await?;
                    if matches!(flow, Flow::Closed) {
                        break Ok(());
                    }
                    arm_heartbeats(&session, &mut send_ticker, &mut liveness_window);
                }
                Some(Err(codec_error)) => {
                    warn!(session = %session.id(), error = %codec_error, "inbound stream failed");
                    let events = session.fail("malformed frame", &codec_error.to_string());
                    let _ = process_events(
                        events, &mut session, &mut sink, &mut settlers,
                        &delivery_tx, &mut pumps, &ctx,
                    ).await;
                    break Ok(());
                }
                None => {
                    debug!(session = %session.id(), "peer closed the connection");
                    break Ok(());
                }
            },

            Some((subscription_id, delivery)) = delivery_rx.recv() => {
                dispatch_delivery(
                    subscription_id, delivery, &mut session, &mut sink, &settlers, &ctx,
                ).await?;
            }

            _ = tick(&mut send_ticker) => {
                sink.send(Transmission::Heartbeat).await?;
            }

            _ = liveness_expired(last_inbound, liveness_window) => {
                warn!(session = %session.id(), "client missed its heartbeat deadline");
                let events = session.fail(
                    "heartbeat timeout",
                    "no data received within the negotiated heartbeat window",
                );
                let _ = process_events(
                    events, &mut session, &mut sink, &mut settlers,
                    &delivery_tx, &mut pumps, &ctx,
                ).await;
                break Ok(());
            }
        }
    };

    // Teardown: cancel consumers and hand every unacknowledged delivery back
    // to the broker as a redelivery candidate. Acks already sent are not
    // retracted.
    for (subscription_id, settler) in settlers.drain() {
        if let Err(e) = settler.cancel().await {
            warn!(subscription = %subscription_id, error = %e, "consumer cancel failed");
        }
        match settler.requeue_outstanding().await {
            Ok(count) if count > 0 => {
                info!(subscription = %subscription_id, count, "requeued unacknowledged deliveries");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(subscription = %subscription_id, error = %e, "requeue failed");
            }
        }
    }
    for pump in pumps {
        pump.abort();
    }
    let _ = sink.close().await;
    session.mark_closed();

    outcome
}

/// Act on the events one inbound frame produced, in order.
async fn process_events<S>(
    initial: Vec<SessionEvent>,
    session: &mut Session,
    sink: &mut FrameSink<S>,
    settlers: &mut HashMap<String, Arc<dyn DeliverySettler>>,
    delivery_tx: &mpsc::Sender<(String, Delivery)>,
    pumps: &mut Vec<JoinHandle<()>>,
    ctx: &ConnectionContext,
) -> Result<Flow, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut queue: VecDeque<SessionEvent> = initial.into();
    while let Some(event) = queue.pop_front() {
        match event {
            SessionEvent::Reply(frame) => {
                sink.send(Transmission::Frame(frame)).await?;
            }

            SessionEvent::OpenSubscription(subscription) => {
                match open_subscription(&subscription, settlers, delivery_tx, pumps, ctx).await {
                    Ok(()) => {}
                    Err(BridgeOpError::Route(e)) => {
                        queue.extend(session.fail("unroutable destination", &e.to_string()));
                    }
                    Err(BridgeOpError::Broker(e)) => {
                        queue.extend(session.fail("broker failure", &e.to_string()));
                    }
                }
            }

            SessionEvent::CloseSubscription(subscription) => {
                if let Some(settler) = settlers.remove(&subscription.id) {
                    if let Err(e) = settler.cancel().await {
                        warn!(subscription = %subscription.id, error = %e, "consumer cancel failed");
                    }
                    if let Err(e) = settler.requeue_outstanding().await {
                        warn!(subscription = %subscription.id, error = %e, "requeue failed");
                    }
                }
            }

            SessionEvent::Forward(frame) => match forward_publish(&frame, session.id(), ctx).await
            {
                Ok(()) => {}
                Err(BridgeOpError::Route(e)) => {
                    queue.extend(session.fail("unroutable destination", &e.to_string()));
                }
                Err(BridgeOpError::Broker(e)) => {
                    queue.extend(session.fail("broker failure", &e.to_string()));
                }
            },

            SessionEvent::Settle {
                subscription_id,
                delivery_id,
                ack,
            } => {
                let cumulative = matches!(
                    session.subscription(&subscription_id).map(|s| s.ack_mode),
                    Some(AckMode::Client)
                );
                match settlers.get(&subscription_id) {
                    Some(settler) => {
                        let result = if ack {
                            settler.ack(&delivery_id, cumulative).await
                        } else {
                            settler.nack(&delivery_id, true).await
                        };
                        match result {
                            Ok(()) => {}
                            Err(BrokerError::UnknownDelivery(id)) => {
                                // Bookkeeping mismatch, surfaced but non-fatal.
                                warn!(delivery = %id, "settle for an unknown delivery");
                            }
                            Err(e) => {
                                queue.extend(session.fail("broker failure", &e.to_string()));
                            }
                        }
                    }
                    None => {
                        warn!(subscription = %subscription_id, "settle for a closed subscription");
                    }
                }
            }

            SessionEvent::UnknownAck { id } => {
                warn!(session = %session.id(), delivery = %id, "ack for an unknown delivery");
            }

            SessionEvent::Close => {
                sink.flush().await?;
                return Ok(Flow::Closed);
            }

            SessionEvent::Terminate(frame) => {
                // Best effort; the client may already be gone.
                let _ = sink.send(Transmission::Frame(frame)).await;
                let _ = sink.flush().await;
                return Ok(Flow::Closed);
            }
        }
    }
    Ok(Flow::Continue)
}

/// Forward one broker delivery to the client as a MESSAGE frame.
async fn dispatch_delivery<S>(
    subscription_id: String,
    delivery: Delivery,
    session: &mut Session,
    sink: &mut FrameSink<S>,
    settlers: &HashMap<String, Arc<dyn DeliverySettler>>,
    ctx: &ConnectionContext,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(subscription) = session.subscription(&subscription_id) else {
        // The subscription closed while this delivery was in flight; its
        // consumer teardown already requeued it.
        debug!(subscription = %subscription_id, "delivery for a closed subscription");
        return Ok(());
    };

    let frame = ctx.router.translate_inbound(&delivery, subscription);
    let auto_ack = !subscription.ack_mode.requires_client_ack();
    if !auto_ack {
        session.register_delivery(&subscription_id, delivery.id.clone());
    }

    sink.send(Transmission::Frame(frame)).await?;

    if auto_ack {
        if let Some(settler) = settlers.get(&subscription_id) {
            if let Err(e) = settler.ack(&delivery.id, false).await {
                warn!(delivery = %delivery.id, error = %e, "auto-ack failed");
            }
        }
    }
    Ok(())
}

/// Bind, consume, and start the pump task for a new subscription.
async fn open_subscription(
    subscription: &Subscription,
    settlers: &mut HashMap<String, Arc<dyn DeliverySettler>>,
    delivery_tx: &mpsc::Sender<(String, Delivery)>,
    pumps: &mut Vec<JoinHandle<()>>,
    ctx: &ConnectionContext,
) -> Result<(), BridgeOpError> {
    let binding = ctx
        .router
        .binding_for(&subscription.destination)
        .map_err(BridgeOpError::Route)?;

    let mut attempts = 0;
    let mut broker_subscription = loop {
        match ctx.broker.subscribe(&binding).await {
            Ok(subscription) => break subscription,
            Err(e) if should_wait_out_outage(&e, attempts, ctx) => {
                attempts += 1;
                debug!(attempts, "broker unavailable, waiting for reconnect");
                tokio::time::sleep(BROKER_RETRY_PAUSE).await;
            }
            Err(e) => return Err(BridgeOpError::Broker(e)),
        }
    };

    settlers.insert(subscription.id.clone(), broker_subscription.settler());

    let tx = delivery_tx.clone();
    let subscription_id = subscription.id.clone();
    pumps.push(tokio::spawn(async move {
        while let Some(next) = broker_subscription.next_delivery().await {
            match next {
                Ok(delivery) => {
                    if tx.send((subscription_id.clone(), delivery)).await.is_err() {
                        break; // connection loop is gone
                    }
                }
                Err(e) => {
                    warn!(subscription = %subscription_id, error = %e, "consumer stream failed");
                    break;
                }
            }
        }
    }));
    Ok(())
}

/// Translate a SEND and publish it, waiting out a broker outage within the
/// retry budget.
async fn forward_publish(
    frame: &Frame,
    session_id: &str,
    ctx: &ConnectionContext,
) -> Result<(), BridgeOpError> {
    let publish = ctx
        .router
        .translate_outbound(frame, session_id)
        .map_err(BridgeOpError::Route)?;

    let mut attempts = 0;
    loop {
        match ctx
            .broker
            .publish(
                &publish.exchange,
                &publish.routing_key,
                &publish.payload,
                publish.properties.clone(),
            )
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) if should_wait_out_outage(&e, attempts, ctx) => {
                attempts += 1;
                debug!(attempts, "broker unavailable, waiting for reconnect");
                tokio::time::sleep(BROKER_RETRY_PAUSE).await;
            }
            Err(e) => return Err(BridgeOpError::Broker(e)),
        }
    }
}

/// Connection-level broker errors are the supervisor's to fix; sessions wait
/// them out until the bridge is declared degraded or the attempts run out.
fn should_wait_out_outage(error: &BrokerError, attempts: u32, ctx: &ConnectionContext) -> bool {
    error.is_connection_error()
        && attempts < ctx.broker_retry_attempts
        && ctx.bridge.phase() != BridgePhase::Degraded
}

/// Arm the heartbeat timers once the session has negotiated them.
fn arm_heartbeats(
    session: &Session,
    send_ticker: &mut Option<Interval>,
    liveness_window: &mut Option<Duration>,
) {
    if send_ticker.is_some() || liveness_window.is_some() {
        return;
    }
    if session.state() != SessionState::Connected {
        return;
    }

    let agreement = session.heartbeat();
    if let Some(interval) = agreement.send_interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        *send_ticker = Some(ticker);
    }
    *liveness_window = agreement.liveness_deadline();
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn liveness_expired(last_inbound: Instant, window: Option<Duration>) {
    match window {
        Some(window) => tokio::time::sleep_until(last_inbound + window).await,
        None => std::future::pending().await,
    }
}
