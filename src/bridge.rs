//! FCU console bridge.
//!
//! The autopilot exposes its interactive shell only as SERIAL_CONTROL frames on the
//! telemetry bus. Output arrives asynchronously, fragmented across frames, and carries
//! no request identifier. [`CommandBridge::execute`] turns that into a blocking call:
//! send one command, collect console output until the shell prints its prompt again,
//! return the text in between.
//!
//! Calls are single-flight. Each call installs a fresh pending slot that the inbound
//! handler fills; the slot is removed when the call completes or times out, so output
//! arriving outside a call is discarded instead of bleeding into the next one.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::messages::{msg_id, SerialControl, SERIAL_CONTROL_DATA_LEN};
use crate::transport::{Frame, TransportAdapter, TransportError};

/// Reply timeout advertised to the autopilot in each request frame, in milliseconds.
const SHELL_REPLY_TIMEOUT_MS: u16 = 3;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot send console command: {0}")]
    Transport(#[from] TransportError),
}

/// Output collected for the call currently in flight.
struct PendingReply {
    buffer: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

struct ShellSession {
    prompt: Vec<u8>,
    pending: Option<PendingReply>,
    decode_failures: u64,
    dropped_frames: u64,
}

impl ShellSession {
    fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.as_bytes().to_vec(),
            pending: None,
            decode_failures: 0,
            dropped_frames: 0,
        }
    }

    /// Inbound frame handler.
    fn on_frame(&mut self, frame: &Frame) {
        if frame.msg_id != msg_id::SERIAL_CONTROL {
            return;
        }

        let message = match SerialControl::decode(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                self.decode_failures += 1;
                debug!("Ignoring malformed console frame: {}", e);
                return;
            }
        };
        if !message.is_reply() {
            return;
        }

        let Some(pending) = self.pending.as_mut() else {
            self.dropped_frames += 1;
            trace!("Dropping {} console bytes with no command in flight", message.data.len());
            return;
        };

        // Only the tail can contain a prompt that was not there before.
        let scan_from = pending.buffer.len().saturating_sub(self.prompt.len().saturating_sub(1));
        pending.buffer.extend_from_slice(&message.data);

        if let Some(at) = find(&pending.buffer[scan_from..], &self.prompt) {
            if let Some(done) = self.pending.take() {
                let mut output = done.buffer;
                output.truncate(scan_from + at);
                strip_prompt_line(&mut output);
                // The caller may have given up already; nothing to do then.
                let _ = done.reply.send(output);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Drop the line the prompt sits on, including the line break before it.
fn strip_prompt_line(output: &mut Vec<u8>) {
    match output.iter().rposition(|b| *b == b'\n') {
        Some(newline) => {
            output.truncate(newline);
            if output.last() == Some(&b'\r') {
                output.pop();
            }
        }
        None => output.clear(),
    }
}

pub struct CommandBridge {
    transport: Arc<dyn TransportAdapter>,
    session: Arc<Mutex<ShellSession>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl CommandBridge {
    /// Create a bridge on `transport`, treating `prompt` as the end-of-output marker.
    pub fn new(transport: Arc<dyn TransportAdapter>, prompt: &str) -> Self {
        let session = Arc::new(Mutex::new(ShellSession::new(prompt)));

        let inbound = Arc::clone(&session);
        transport.on_receive(Arc::new(move |frame: &Frame| {
            inbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_frame(frame);
        }));

        Self {
            transport,
            session,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Run `command` on the FCU console and return its output.
    ///
    /// Waits until the console prompt comes back or `timeout` elapses. On timeout the
    /// output collected so far is returned, which may be empty; an empty result means
    /// "no data", not a protocol error. So is a link that has not heard from the FCU
    /// yet. Concurrent calls are queued.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, BridgeError> {
        let _turn = self.in_flight.lock().await;

        let mut input = command.as_bytes().to_vec();
        if !input.ends_with(b"\n") {
            input.push(b'\n');
        }
        if !SerialControl::fits(&input) {
            warn!(
                "Console command '{}' exceeds {} bytes and will be truncated",
                command.trim_end(),
                SERIAL_CONTROL_DATA_LEN
            );
        }

        let (reply_tx, mut reply_rx) = oneshot::channel();
        self.session().pending = Some(PendingReply {
            buffer: Vec::new(),
            reply: reply_tx,
        });

        let request = SerialControl::shell_request(&input, SHELL_REPLY_TIMEOUT_MS);
        let frame = Frame::new(msg_id::SERIAL_CONTROL, request.encode());
        match self.transport.publish(frame) {
            Ok(()) => {}
            // Nothing heard from the FCU yet: same as a console that never answers.
            Err(TransportError::NoPeer) => {
                self.session().pending = None;
                debug!("Console command '{}' not sent: no FCU peer yet", command.trim_end());
                return Ok(String::new());
            }
            Err(e) => {
                self.session().pending = None;
                return Err(e.into());
            }
        }
        debug!("Console command sent: {}", command.trim_end());

        let output = match tokio::time::timeout(timeout, &mut reply_rx).await {
            Ok(Ok(output)) => output,
            _ => {
                let pending = self.session().pending.take();
                match pending {
                    Some(pending) => {
                        debug!(
                            "Console command '{}' timed out after {:?} with {} bytes collected",
                            command.trim_end(),
                            timeout,
                            pending.buffer.len()
                        );
                        pending.buffer
                    }
                    // Completed between the deadline and here.
                    None => reply_rx.try_recv().unwrap_or_default(),
                }
            }
        };

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Console frames that could not be decoded since the bridge was created.
    pub fn decode_failures(&self) -> u64 {
        self.session().decode_failures
    }

    /// Console frames discarded because no command was in flight.
    pub fn dropped_frames(&self) -> u64 {
        self.session().dropped_frames
    }

    fn session(&self) -> std::sync::MutexGuard<'_, ShellSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
