//! FCU parameter reads.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::diagnostics::DiagnosticContext;
use crate::messages::{msg_id, ParamRequestRead, ParamValueMessage};
use crate::transport::{Frame, TransportAdapter, TransportError};
use crate::BoxFuture;

/// Raw reply of a parameter read. Integer and real representations share one reply;
/// `success` is false when the service could not provide the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParamReply {
    pub success: bool,
    pub integer: i64,
    pub real: f64,
}

impl ParamReply {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Request/response parameter service.
pub trait ParameterService: Send + Sync {
    fn request_parameter<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ParamReply, TransportError>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Real(f64),
}

impl ParamValue {
    pub fn from_reply(reply: &ParamReply) -> Self {
        if reply.integer != 0 {
            ParamValue::Integer(reply.integer)
        } else {
            ParamValue::Real(reply.real)
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Integer(v) => v as f64,
            ParamValue::Real(v) => v,
        }
    }

    /// Integer view; reals are truncated toward zero.
    pub fn as_i64(self) -> i64 {
        match self {
            ParamValue::Integer(v) => v,
            ParamValue::Real(v) => v as i64,
        }
    }

    /// Test bit `bit` of a bitmask parameter.
    pub fn has_bit(self, bit: u32) -> bool {
        bit < 64 && self.as_i64() & (1i64 << bit) != 0
    }

    pub fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{}", v),
            ParamValue::Real(v) => match f.precision() {
                Some(precision) => write!(f, "{:.*}", precision, v),
                None => write!(f, "{}", v),
            },
        }
    }
}

/// Parameter reads that report their own failures to the running probe.
#[derive(Clone)]
pub struct ParameterAccessor {
    service: Arc<dyn ParameterService>,
}

impl ParameterAccessor {
    pub fn new(service: Arc<dyn ParameterService>) -> Self {
        Self { service }
    }

    /// Read parameter `name`.
    ///
    /// Returns `None` after reporting exactly one failure when the request cannot be
    /// made or the service cannot provide the parameter, so callers can simply skip
    /// the checks that depend on it.
    pub async fn get(&self, ctx: &DiagnosticContext, name: &str) -> Option<ParamValue> {
        match self.service.request_parameter(name).await {
            Err(e) => {
                ctx.failure(format_args!("{}: {}", name, e));
                None
            }
            Ok(reply) if !reply.success => {
                ctx.failure(format_args!("unable to retrieve FCU parameter {}", name));
                None
            }
            Ok(reply) => {
                let value = ParamValue::from_reply(&reply);
                trace!("Parameter {} = {}", name, value);
                Some(value)
            }
        }
    }
}

type Waiters = HashMap<String, Vec<oneshot::Sender<ParamValueMessage>>>;

/// Parameter service speaking PARAM_REQUEST_READ / PARAM_VALUE on the telemetry bus.
pub struct MavlinkParameterService {
    transport: Arc<dyn TransportAdapter>,
    waiters: Arc<Mutex<Waiters>>,
    target_system: u8,
    target_component: u8,
    timeout: Duration,
}

impl MavlinkParameterService {
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        target_system: u8,
        target_component: u8,
        timeout: Duration,
    ) -> Self {
        let waiters: Arc<Mutex<Waiters>> = Arc::default();

        let inbound = Arc::clone(&waiters);
        transport.on_receive(Arc::new(move |frame: &Frame| {
            if frame.msg_id != msg_id::PARAM_VALUE {
                return;
            }
            let value = match ParamValueMessage::decode(&frame.payload) {
                Ok(value) => value,
                Err(e) => {
                    debug!("Ignoring malformed PARAM_VALUE: {}", e);
                    return;
                }
            };
            let waiting = inbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(value.param_id.as_str());
            for waiter in waiting.into_iter().flatten() {
                let _ = waiter.send(value.clone());
            }
        }));

        Self {
            transport,
            waiters,
            target_system,
            target_component,
            timeout,
        }
    }

    async fn read(&self, name: &str) -> Result<ParamReply, TransportError> {
        let request = match ParamRequestRead::by_name(name, self.target_system, self.target_component) {
            Ok(request) => request,
            Err(e) => {
                debug!("Not requesting parameter: {}", e);
                return Ok(ParamReply::unavailable());
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .push(reply_tx);

        if let Err(e) = self.transport.publish(Frame::new(msg_id::PARAM_REQUEST_READ, request.encode())) {
            self.forget(name);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(ParamReply {
                success: true,
                integer: value.integer_value().unwrap_or(0),
                real: value.real_value().unwrap_or(0.0),
            }),
            _ => {
                self.forget(name);
                debug!("No PARAM_VALUE for {} within {:?}", name, self.timeout);
                Ok(ParamReply::unavailable())
            }
        }
    }

    /// Drop waiters whose receivers are gone.
    fn forget(&self, name: &str) {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = waiters.get_mut(name) {
            list.retain(|waiter| !waiter.is_closed());
            if list.is_empty() {
                waiters.remove(name);
            }
        }
    }
}

impl ParameterService for MavlinkParameterService {
    fn request_parameter<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ParamReply, TransportError>> {
        Box::pin(self.read(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_preferred_when_non_zero() {
        let reply = ParamReply {
            success: true,
            integer: 1,
            real: 0.0,
        };
        assert_eq!(ParamValue::from_reply(&reply), ParamValue::Integer(1));

        let reply = ParamReply {
            success: true,
            integer: 0,
            real: 0.25,
        };
        assert_eq!(ParamValue::from_reply(&reply), ParamValue::Real(0.25));
    }

    #[test]
    fn test_bitmask_and_display() {
        let fusion = ParamValue::Integer(0b1001_0110);
        assert!(fusion.has_bit(1));
        assert!(fusion.has_bit(4));
        assert!(fusion.has_bit(7));
        assert!(!fusion.has_bit(0));
        assert!(!fusion.has_bit(64));

        assert_eq!(format!("{:.2}", ParamValue::Real(0.5)), "0.50");
        assert_eq!(format!("{}", ParamValue::Integer(3)), "3");
        assert!(ParamValue::Real(0.0).is_zero());
    }
}
