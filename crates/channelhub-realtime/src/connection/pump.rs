//! Per-connection reader and writer tasks.
//!
//! The reader decodes frames and either answers `data` requests directly or
//! enqueues control messages for the hub loop. The writer drains the
//! outbound queue and keeps the link alive with pings. Neither touches the
//! registries.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, warn};

use crate::error::{HubError, HubResult};
use crate::hub::control::ControlMessage;
use crate::hub::hooks::DataResolver;
use crate::message::types::{HubMessage, Method, Payload, is_routable_channel_id};
use crate::metrics::HubMetrics;

use super::handle::Connection;
use super::transport::{Frame, FrameSink, FrameStream, TransportError};

/// Everything a pump needs from the hub.
#[derive(Clone)]
pub(crate) struct PumpContext {
    pub input: mpsc::Sender<ControlMessage>,
    pub unregister: mpsc::Sender<Arc<Connection>>,
    pub data_resolver: Option<Arc<dyn DataResolver>>,
    pub channel_id_length_limit: usize,
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub metrics: Arc<HubMetrics>,
}

/// Starts both pumps for a registered connection.
pub(crate) fn spawn(
    conn: &Arc<Connection>,
    stream: FrameStream,
    sink: FrameSink,
    outbound: mpsc::Receiver<Payload>,
    ctx: &PumpContext,
) {
    tokio::spawn(write_pump(Arc::clone(conn), sink, outbound, ctx.clone()));
    tokio::spawn(read_pump(Arc::clone(conn), stream, ctx.clone()));
}

async fn read_pump(conn: Arc<Connection>, mut stream: FrameStream, ctx: PumpContext) {
    let shutdown = conn.shutdown_token();
    debug!(conn_id = %conn.id(), user_id = %conn.user_id(), "Reader started");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = timeout(ctx.pong_wait, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => {
                debug!(conn_id = %conn.id(), "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                let e = HubError::from(e);
                warn!(conn_id = %conn.id(), error = %e, "Transport read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            Frame::Text(text) => {
                if !handle_text(&conn, &ctx, &text).await {
                    break;
                }
            }
            Frame::Close => break,
            Frame::Ping(_) | Frame::Pong(_) => {}
        }
    }

    debug!(conn_id = %conn.id(), "Reader stopped");
    if conn.is_closed() {
        return;
    }
    if ctx.unregister.send(Arc::clone(&conn)).await.is_err() {
        conn.close();
    }
}

/// Handles one text frame. Returns `false` when the hub is gone.
async fn handle_text(conn: &Arc<Connection>, ctx: &PumpContext, text: &str) -> bool {
    let mut msg: HubMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(conn_id = %conn.id(), error = %e, "Malformed frame skipped");
            ctx.metrics.inc_dropped();
            return true;
        }
    };
    ctx.metrics.inc_received();

    let Some(method) = msg.method else {
        ctx.metrics.inc_dropped();
        return true;
    };
    msg.normalize_channel_id();
    if !is_routable_channel_id(&msg.channel_id, ctx.channel_id_length_limit) {
        debug!(conn_id = %conn.id(), channel_id = %msg.channel_id, "Unroutable channel id");
        ctx.metrics.inc_dropped();
        return true;
    }
    msg.client_id = conn.user_id().to_string();

    match method {
        Method::Data => {
            if let Some(resolver) = &ctx.data_resolver {
                resolver.fill(&mut msg, &conn.info()).await;
            }
            conn.send_message(&msg).await;
            true
        }
        Method::System => {
            ctx.metrics.inc_dropped();
            true
        }
        _ => ctx
            .input
            .send(ControlMessage::from_client(msg, Arc::clone(conn)))
            .await
            .is_ok(),
    }
}

async fn write_pump(
    conn: Arc<Connection>,
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<Payload>,
    ctx: PumpContext,
) {
    let shutdown = conn.shutdown_token();
    let mut ping = interval_at(Instant::now() + ctx.ping_interval, ctx.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let last = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Some(Frame::Close),
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = write_frame(&mut sink, Frame::Text(payload.to_string()), ctx.write_wait).await {
                        warn!(conn_id = %conn.id(), error = %e, "Transport write failed");
                        break None;
                    }
                    ctx.metrics.inc_sent();
                    ping.reset();
                }
                None => break Some(Frame::Close),
            },
            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), ctx.write_wait).await {
                    debug!(conn_id = %conn.id(), error = %e, "Ping failed");
                    break None;
                }
            }
        }
    };

    if let Some(frame) = last {
        let _ = write_frame(&mut sink, frame, ctx.write_wait).await;
    }
    shutdown.cancel();
    let _ = timeout(ctx.write_wait, sink.close()).await;
    debug!(conn_id = %conn.id(), "Writer stopped");
}

async fn write_frame(sink: &mut FrameSink, frame: Frame, wait: Duration) -> HubResult<()> {
    match timeout(wait, sink.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::new("write deadline exceeded").into()),
    }
}
