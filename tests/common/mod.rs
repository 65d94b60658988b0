//! Simulated FCU for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flightcheck::messages::*;
use flightcheck::transport::{Frame, LoopbackTransport};
use tokio::task::JoinHandle;

/// Console output split into REPLY frames.
pub fn console_output(text: &str) -> Vec<Frame> {
    text.as_bytes()
        .chunks(SERIAL_CONTROL_DATA_LEN)
        .map(|chunk| {
            let mut data = ConsoleData::new();
            data.try_extend_from_slice(chunk).unwrap();
            let message = SerialControl {
                baudrate: 0,
                timeout_ms: 0,
                device: SERIAL_CONTROL_DEV_SHELL,
                flags: SERIAL_CONTROL_FLAG_REPLY,
                data,
            };
            Frame::new(msg_id::SERIAL_CONTROL, message.encode())
        })
        .collect()
}

pub fn heartbeat() -> Frame {
    // quadrotor, PX4 autopilot, standby
    Frame::new(msg_id::HEARTBEAT, vec![0, 0, 0, 0, 2, 12, 0, 3, 3])
}

/// Autopilot stand-in answering parameter reads and console commands.
#[derive(Default)]
pub struct SimulatedFcu {
    params: HashMap<String, ParamValueMessage>,
    console: HashMap<String, String>,
}

impl SimulatedFcu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int_param(mut self, name: &str, value: i32) -> Self {
        self.params
            .insert(name.to_string(), ParamValueMessage::integer(name, value).unwrap());
        self
    }

    pub fn real_param(mut self, name: &str, value: f32) -> Self {
        self.params.insert(name.to_string(), ParamValueMessage::real(name, value).unwrap());
        self
    }

    /// Answer console `command` with `output` followed by the prompt.
    pub fn command(mut self, command: &str, output: &str) -> Self {
        self.console.insert(format!("{}\n", command), format!("{}\nnsh> ", output));
        self
    }

    fn respond(&self, frame: &Frame) -> Vec<Frame> {
        match frame.msg_id {
            msg_id::PARAM_REQUEST_READ => {
                let request = ParamRequestRead::decode(&frame.payload).unwrap();
                match self.params.get(request.param_id.as_str()) {
                    Some(value) => vec![Frame::new(msg_id::PARAM_VALUE, value.encode())],
                    None => Vec::new(),
                }
            }
            msg_id::SERIAL_CONTROL => {
                let request = SerialControl::decode(&frame.payload).unwrap();
                let input = String::from_utf8_lossy(&request.data).into_owned();
                match (input.as_str(), self.console.get(&input)) {
                    ("\n", None) => console_output("nsh> "),
                    (_, Some(output)) => console_output(output),
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    pub fn into_transport(self) -> Arc<LoopbackTransport> {
        LoopbackTransport::with_responder(move |frame| self.respond(frame))
    }
}

/// Deliver `frames` every 20 ms until the returned task is aborted.
pub fn stream(transport: &Arc<LoopbackTransport>, frames: Vec<Frame>) -> JoinHandle<()> {
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for frame in &frames {
                transport.deliver(frame);
            }
        }
    })
}
