//! The vehicle self-check probe set.
//!
//! Every probe is an async function over a shared [`ProbeEnv`] and the fresh
//! [`DiagnosticContext`] of its run. Problems with the vehicle are reported as
//! failures; returning an error means the probe itself could not do its job.

pub mod fcu;
pub mod sensors;
pub mod system;

use std::sync::Arc;

use crate::bridge::{BridgeError, CommandBridge};
use crate::config::HarnessConfig;
use crate::diagnostics::DiagnosticContext;
use crate::params::{MavlinkParameterService, ParamValue, ParameterAccessor};
use crate::runner::Probe;
use crate::transport::TransportAdapter;
use crate::watch::TelemetryWatch;

/// Everything a probe may talk to.
pub struct ProbeEnv {
    pub config: HarnessConfig,
    pub bridge: CommandBridge,
    pub params: ParameterAccessor,
    pub watch: TelemetryWatch,
}

impl ProbeEnv {
    pub fn new(config: HarnessConfig, bridge: CommandBridge, params: ParameterAccessor, watch: TelemetryWatch) -> Self {
        Self {
            config,
            bridge,
            params,
            watch,
        }
    }

    /// Wire console, parameter and telemetry access onto one MAVLink link.
    pub fn over_mavlink(config: HarnessConfig, transport: Arc<dyn TransportAdapter>) -> Self {
        let bridge = CommandBridge::new(Arc::clone(&transport), &config.shell.prompt);
        let service = MavlinkParameterService::new(
            Arc::clone(&transport),
            config.link.target_system,
            config.link.target_component,
            config.params.timeout(),
        );
        let watch = TelemetryWatch::new(transport.as_ref());
        Self::new(config, bridge, ParameterAccessor::new(Arc::new(service)), watch)
    }

    /// Run a console command with the configured timeout.
    pub async fn shell(&self, command: &str) -> Result<String, BridgeError> {
        self.bridge.execute(command, self.config.shell.command_timeout()).await
    }

    pub async fn param(&self, ctx: &DiagnosticContext, name: &str) -> Option<ParamValue> {
        self.params.get(ctx, name).await
    }

    /// Read several parameters; `None` unless all of them could be read. Every
    /// missing parameter is reported on its own.
    pub async fn params<const N: usize>(&self, ctx: &DiagnosticContext, names: [&str; N]) -> Option<[ParamValue; N]> {
        let mut values = Vec::with_capacity(N);
        for name in names {
            values.push(self.params.get(ctx, name).await);
        }
        values.into_iter().collect::<Option<Vec<_>>>()?.try_into().ok()
    }

    /// The attitude/position estimator selected on the FCU.
    pub async fn estimator(&self, ctx: &DiagnosticContext) -> Option<Estimator> {
        self.param(ctx, "SYS_MC_EST_GROUP").await.map(Estimator::from_param)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimator {
    Lpe,
    Ekf2,
    Unknown(ParamValue),
}

impl Estimator {
    pub fn from_param(value: ParamValue) -> Self {
        let raw = value.as_f64();
        if raw == 1.0 {
            Estimator::Lpe
        } else if raw == 2.0 {
            Estimator::Ekf2
        } else {
            Estimator::Unknown(value)
        }
    }
}

/// All probes, in run order.
pub fn default_probes() -> Vec<Probe<ProbeEnv>> {
    vec![
        Probe::new("Image", system::check_image),
        Probe::new("Service", system::check_service),
        Probe::new("FCU", fcu::check_fcu),
        Probe::new("IMU", sensors::check_imu),
        Probe::new("Local position", sensors::check_local_position),
        Probe::new("Velocity estimation", sensors::check_velocity),
        Probe::new("Global position (GPS)", sensors::check_global_position),
        Probe::new("Preflight status", fcu::check_preflight_status),
        Probe::new("Optical flow", sensors::check_optical_flow),
        Probe::new("Vision position estimate", sensors::check_vpe),
        Probe::new("Rangefinder", sensors::check_rangefinder),
        Probe::new("CPU usage", system::check_cpu_usage),
        Probe::new("Boot duration", system::check_boot_duration),
    ]
}
