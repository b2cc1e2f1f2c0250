//! Text-to-speech player.
//!
//! # Flow
//!
//! 1. Stop whatever is playing
//! 2. Reuse the open socket, or handshake a new one
//! 3. Send `222["voice_over", {...}]` for the message uuid
//! 4. Push every binary frame to the sink as PCM
//! 5. Stop listening on the DONE status, or after the idle timeout

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::protocol::Envelope;
use crate::transport::{SocketEvent, SocketHandle, SocketRegistry};

use super::{AudioSink, PcmChunk};

// ============================================================================
// Constants
// ============================================================================

/// Message code of a voice-over request.
const VOICE_OVER_CODE: u32 = 222;

/// Event name of a voice-over request.
const VOICE_OVER_EVENT: &str = "voice_over";

/// Client version the host expects in voice-over requests.
const VOICE_OVER_VERSION: &str = "2.13";

/// Substring of the status frame that ends a voice-over.
const DONE_MARKER: &str = r#""status":"completed","state":"DONE""#;

/// Default time without audio before listening stops.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// TtsVoice
// ============================================================================

/// Voice presets offered by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TtsVoice {
    #[default]
    Mike,
    Alex,
    Kate,
    Mary,
}

impl TtsVoice {
    /// Every voice, in menu order.
    pub const ALL: [Self; 4] = [Self::Mike, Self::Alex, Self::Kate, Self::Mary];

    /// Returns the preset name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mike => "Mike",
            Self::Alex => "Alex",
            Self::Kate => "Kate",
            Self::Mary => "Mary",
        }
    }
}

impl std::fmt::Display for TtsVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TtsPlayer
// ============================================================================

#[derive(Default)]
struct PlayerState {
    /// Socket of the last voice-over.
    socket: Option<SocketHandle>,
    /// Ends the current listener early.
    cancel: Option<oneshot::Sender<()>>,
    /// Set while a voice-over is being received.
    playing: bool,
    /// Bumped by every `play`; a listener only clears its own state.
    generation: u64,
}

/// Requests voice-overs and streams them to an [`AudioSink`].
pub struct TtsPlayer {
    sockets: Arc<SocketRegistry>,
    sink: Arc<dyn AudioSink>,
    idle_timeout: Duration,
    state: Mutex<PlayerState>,
}

impl std::fmt::Debug for TtsPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsPlayer")
            .field("idle_timeout", &self.idle_timeout)
            .field("playing", &self.is_playing())
            .finish_non_exhaustive()
    }
}

impl TtsPlayer {
    /// Creates an idle player.
    #[must_use]
    pub fn new(sockets: Arc<SocketRegistry>, sink: Arc<dyn AudioSink>, idle_timeout: Duration) -> Self {
        Self {
            sockets,
            sink,
            idle_timeout,
            state: Mutex::new(PlayerState::default()),
        }
    }

    /// Returns `true` while a voice-over is being received.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Plays the voice-over of the message with backend `uuid`.
    ///
    /// Resolves when listening ends: on the DONE status, after the idle
    /// timeout, when the socket closes, or when [`stop`](Self::stop) is
    /// called.
    ///
    /// # Errors
    ///
    /// - Handshake errors from [`SocketRegistry::handshake`]
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the
    ///   request cannot be sent
    pub async fn play(&self, uuid: &str, voice: TtsVoice) -> Result<()> {
        if self.is_playing() {
            self.stop();
        }

        let socket = self.socket().await?;
        let mut events = socket.subscribe();
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let generation = {
            let mut state = self.state.lock();
            state.cancel = Some(cancel_tx);
            state.playing = true;
            state.generation += 1;
            state.generation
        };

        let request = Envelope::event(
            VOICE_OVER_CODE,
            VOICE_OVER_EVENT,
            vec![json!({
                "is_page": false,
                "version": VOICE_OVER_VERSION,
                "completed": true,
                "uuid": uuid,
                "preset": voice.as_str(),
                "voice_over_language": "en",
            })],
        );

        if let Err(e) = socket.send_envelope(&request) {
            self.finish(generation);
            return Err(e);
        }

        info!(%uuid, %voice, "Voice-over requested");

        let idle = sleep(self.idle_timeout);
        tokio::pin!(idle);
        let mut chunks = 0usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    debug!("Voice-over cancelled");
                    break;
                }

                () = &mut idle => {
                    debug!(chunks, "Voice-over idle, listening stopped");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Ok(SocketEvent::Binary(bytes)) => {
                            self.sink.push(PcmChunk::from_le_bytes(&bytes));
                            chunks += 1;
                            idle.as_mut().reset(Instant::now() + self.idle_timeout);
                        }

                        Ok(SocketEvent::Message(text)) => {
                            if text.contains(DONE_MARKER) {
                                debug!(chunks, "Voice-over complete");
                                break;
                            }
                            trace!(%text, "Ignoring status frame");
                        }

                        Ok(SocketEvent::Closed) | Err(RecvError::Closed) => {
                            debug!(chunks, "Voice-over socket closed");
                            break;
                        }

                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Voice-over listener lagged, audio frames lost");
                        }
                    }
                }
            }
        }

        self.finish(generation);
        Ok(())
    }

    /// Stops the current voice-over.
    ///
    /// Cancels the listener, closes the socket if audio was being received
    /// and tells the sink to stop.
    pub fn stop(&self) {
        let (cancel, socket) = {
            let mut state = self.state.lock();
            let socket = if state.playing { state.socket.take() } else { None };
            state.playing = false;
            (state.cancel.take(), socket)
        };

        if let Some(cancel) = cancel {
            let _ = cancel.send(());
        }
        if let Some(socket) = socket
            && !self.sockets.remove_socket(socket.session_id())
        {
            socket.close();
        }

        self.sink.stop();
        debug!("Voice-over stopped");
    }

    /// Returns the open socket or handshakes a new one.
    async fn socket(&self) -> Result<SocketHandle> {
        let existing = self
            .state
            .lock()
            .socket
            .clone()
            .filter(|socket| !socket.is_closed());

        if let Some(socket) = existing {
            return Ok(socket);
        }

        let socket = self.sockets.handshake(None).await?;
        self.state.lock().socket = Some(socket.clone());
        Ok(socket)
    }

    /// Clears the listening state unless a newer `play` owns it.
    fn finish(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.cancel = None;
            state.playing = false;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
