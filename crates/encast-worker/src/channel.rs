//! WebSocket control channel to the controller.
//!
//! One session at a time: connect, register, then relay control frames in
//! and worker events out until the session drops. Reconnects keep the
//! encoder id granted on first registration; without one yet, a failed or
//! denied session is fatal so a misconfigured worker does not retry
//! forever against a controller that will never accept it.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use encast_models::{ControlMessage, WorkerMessage};

use crate::config::WorkerConfig;
use crate::controller::JobController;
use crate::error::{WorkerError, WorkerResult};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsError = tokio_tungstenite::tungstenite::Error;

/// How a session ended.
enum SessionEnd {
    /// The connection dropped; the channel should reconnect.
    Disconnected,
    /// The controller asked the worker to quit.
    Quit,
}

/// What a handled control frame asks of the session loop.
#[derive(PartialEq)]
enum ControlAction {
    Continue,
    Quit,
}

/// Connection manager for the control channel.
pub struct ControlChannel {
    config: Arc<WorkerConfig>,
    controller: Arc<JobController>,
    events: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl ControlChannel {
    pub fn new(
        config: Arc<WorkerConfig>,
        controller: Arc<JobController>,
        events: mpsc::UnboundedReceiver<WorkerMessage>,
    ) -> Self {
        Self {
            config,
            controller,
            events,
        }
    }

    /// Drive the channel until the controller sends `quit`.
    ///
    /// The first session must both reach the controller and be granted an
    /// identity; any failure before that is returned. Later sessions
    /// reconnect after a fixed delay, re-registering with the granted id.
    pub async fn run(self) -> WorkerResult<()> {
        let ControlChannel {
            config,
            controller,
            mut events,
        } = self;
        let url = config.ws_url()?;
        let mut encoder_id: Option<String> = None;

        loop {
            let boot = encoder_id.is_none();
            info!(url = %url, "Connecting to controller");
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    match run_session(&config, &controller, &mut events, ws, &mut encoder_id).await
                    {
                        Ok(SessionEnd::Quit) => {
                            info!("Control channel closed after quit");
                            return Ok(());
                        }
                        Ok(SessionEnd::Disconnected) => {
                            warn!("Control session ended, reconnecting");
                        }
                        Err(e) if boot && encoder_id.is_none() => return Err(e),
                        Err(e) => warn!(error = %e, "Control session failed"),
                    }
                }
                Err(e) if boot => {
                    return Err(WorkerError::channel_error(format!(
                        "unable to reach controller: {e}"
                    )));
                }
                Err(e) => warn!(error = %e, "Controller connection failed"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

/// Run one registered session to completion.
async fn run_session(
    config: &WorkerConfig,
    controller: &Arc<JobController>,
    events: &mut mpsc::UnboundedReceiver<WorkerMessage>,
    ws: WsStream,
    encoder_id: &mut Option<String>,
) -> WorkerResult<SessionEnd> {
    let (mut sink, mut stream) = ws.split();

    let id = register(&mut sink, &mut stream, config.token(), encoder_id.clone()).await?;
    info!(encoder_id = %id, "Registered with controller");
    *encoder_id = Some(id);

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    send_message(
        &mut sink,
        &WorkerMessage::info(hostname, num_cpus::get(), config.priority),
    )
    .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(message) => send_message(&mut sink, &message).await?,
                None => return Ok(SessionEnd::Disconnected),
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if handle_control(controller, &mut sink, &text).await? == ControlAction::Quit {
                        // Deliveries already in flight finish before the
                        // channel closes; nothing gets abandoned mid-batch.
                        info!("Quit requested, waiting for in-flight uploads");
                        controller.wait_for_delivery().await;
                        while let Ok(message) = events.try_recv() {
                            send_message(&mut sink, &message).await?;
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Quit);
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Keepalives are answered by the protocol layer.
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Controller closed the channel");
                    return Ok(SessionEnd::Disconnected);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Control channel receive error");
                    return Ok(SessionEnd::Disconnected);
                }
                None => return Ok(SessionEnd::Disconnected),
            }
        }
    }
}

/// Send `register` and wait for the verdict. A `registered` frame without
/// an encoder id is a denial.
async fn register<S>(
    sink: &mut S,
    stream: &mut SplitStream<WsStream>,
    token: &str,
    encoder_id: Option<String>,
) -> WorkerResult<String>
where
    S: SinkExt<Message, Error = WsError> + Unpin,
{
    send_message(sink, &WorkerMessage::register(token, encoder_id)).await?;

    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(ControlMessage::Registered {
                    encoder_id: Some(id),
                }) => return Ok(id),
                Ok(ControlMessage::Registered { encoder_id: None }) => {
                    return Err(WorkerError::RegistrationDenied);
                }
                Ok(_) => {
                    warn!("Ignoring control frame received before registration");
                }
                Err(e) => {
                    warn!(error = %e, raw = %text, "Malformed frame during registration");
                }
            },
            Message::Close(frame) => {
                return Err(WorkerError::channel_error(format!(
                    "controller closed the channel during registration: {frame:?}"
                )));
            }
            _ => {}
        }
    }
    Err(WorkerError::channel_error(
        "connection lost during registration",
    ))
}

/// Dispatch one inbound control frame.
async fn handle_control<S>(
    controller: &Arc<JobController>,
    sink: &mut S,
    text: &str,
) -> WorkerResult<ControlAction>
where
    S: SinkExt<Message, Error = WsError> + Unpin,
{
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(ControlMessage::NewJob { job }) => {
            let asset = job.asset.clone();
            let ack = match controller.admit(job) {
                Ok(()) => WorkerMessage::ack_accepted(),
                Err(reason) => {
                    warn!(asset = %asset, reason = %reason, "Job rejected");
                    WorkerMessage::ack_rejected(reason)
                }
            };
            send_message(sink, &ack).await?;
        }
        Ok(ControlMessage::Stop) => controller.request_stop(),
        Ok(ControlMessage::Quit) => return Ok(ControlAction::Quit),
        Ok(ControlMessage::Registered { .. }) => {
            debug!("Ignoring duplicate registration verdict");
        }
        Err(e) => warn!(error = %e, raw = %text, "Unknown or malformed control frame"),
    }
    Ok(ControlAction::Continue)
}

async fn send_message<S>(sink: &mut S, message: &WorkerMessage) -> WorkerResult<()>
where
    S: SinkExt<Message, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures::Sink;

    /// Sink double that records frames and fails like a closed socket
    /// once the receiving side is gone.
    struct RecordingSink(std::sync::mpsc::Sender<Message>);

    impl Sink<Message> for RecordingSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
            self.0.send(item).map_err(|_| WsError::ConnectionClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    fn recording_sink() -> (RecordingSink, std::sync::mpsc::Receiver<Message>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (RecordingSink(tx), rx)
    }

    fn sent_json(frame: Message) -> serde_json::Value {
        match frame {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_message_writes_tagged_json() {
        let (mut sink, rx) = recording_sink();
        send_message(
            &mut sink,
            &WorkerMessage::state(encast_models::RunStatus::Idle),
        )
        .await
        .unwrap();

        let value = sent_json(rx.try_recv().unwrap());
        assert_eq!(value["type"], "state");
        assert_eq!(value["state"], "idle");
    }

    #[tokio::test]
    async fn test_register_frame_carries_token_and_prior_id() {
        let (mut sink, rx) = recording_sink();
        send_message(
            &mut sink,
            &WorkerMessage::register("secret", Some("enc-1".to_string())),
        )
        .await
        .unwrap();

        let value = sent_json(rx.try_recv().unwrap());
        assert_eq!(value["type"], "register");
        assert_eq!(value["token"], "secret");
        assert_eq!(value["encoderId"], "enc-1");
    }

    #[tokio::test]
    async fn test_send_message_surfaces_a_closed_sink() {
        let (mut sink, rx) = recording_sink();
        drop(rx);

        let err = send_message(&mut sink, &WorkerMessage::ack_accepted())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::WebSocket(_)));
    }
}
