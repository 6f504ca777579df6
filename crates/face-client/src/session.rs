use face_protocol::BroadcastNotification;
use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::reducer::{FaceState, TabEffect, TabReducer};

#[derive(Debug, Error)]
pub enum TabSessionError {
    #[error("tab_session_connect_failed:{message}")]
    Connect { message: String },
    #[error("tab_session_stream_failed:{message}")]
    Stream { message: String },
}

#[derive(Debug, Clone)]
pub struct AppliedNotification {
    pub notification: BroadcastNotification,
    pub effects: Vec<TabEffect>,
}

/// One tab attached to the broker's event stream, with its own reducer.
pub struct TabSession {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    reducer: TabReducer,
}

impl TabSession {
    pub async fn connect(events_url: &str) -> Result<Self, TabSessionError> {
        Self::connect_with_state(events_url, FaceState::default()).await
    }

    pub async fn connect_with_state(
        events_url: &str,
        state: FaceState,
    ) -> Result<Self, TabSessionError> {
        let (socket, _) =
            connect_async(events_url)
                .await
                .map_err(|error| TabSessionError::Connect {
                    message: error.to_string(),
                })?;
        debug!(events_url, "tab attached to broker event stream");
        Ok(Self {
            socket,
            reducer: TabReducer::new(state),
        })
    }

    #[must_use]
    pub fn state(&self) -> &FaceState {
        self.reducer.state()
    }

    /// Local UI events mutate the same reducer the broadcasts feed.
    pub fn reducer_mut(&mut self) -> &mut TabReducer {
        &mut self.reducer
    }

    /// Waits for the next notification, applies it and returns what happened.
    /// `Ok(None)` means the broker closed the stream.
    pub async fn next_notification(
        &mut self,
    ) -> Result<Option<AppliedNotification>, TabSessionError> {
        while let Some(frame) = self.socket.next().await {
            let frame = frame.map_err(|error| TabSessionError::Stream {
                message: error.to_string(),
            })?;
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };
            let notification = match serde_json::from_str::<BroadcastNotification>(&text) {
                Ok(notification) => notification,
                Err(error) => {
                    warn!(error = %error, "ignoring undecodable broker frame");
                    continue;
                }
            };
            let effects = self.reducer.apply(&notification);
            return Ok(Some(AppliedNotification {
                notification,
                effects,
            }));
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), TabSessionError> {
        self.socket
            .close(None)
            .await
            .map_err(|error| TabSessionError::Stream {
                message: error.to_string(),
            })?;
        // Drain until the broker acknowledges the close.
        while let Some(frame) = self.socket.next().await {
            if frame.is_err() {
                break;
            }
        }
        Ok(())
    }
}
