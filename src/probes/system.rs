//! Companion computer checks.

use std::sync::Arc;

use crate::diagnostics::DiagnosticContext;
use crate::host::{self, HostError};
use crate::probes::ProbeEnv;
use crate::runner::ProbeResult;

pub async fn check_image(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let version = host::read_version_file(&env.config.host.version_file).await?;
    ctx.info(format_args!("version: {}", version));
    Ok(())
}

pub async fn check_service(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let unit = env.config.host.service_unit.as_str();
    let state = host::command_output("systemctl", &["show", "-p", "ActiveState", "--value", unit]).await?;
    if host::is_service_down(&state) {
        ctx.failure(format_args!(
            "{} is not running, try sudo systemctl restart {}",
            unit,
            unit.trim_end_matches(".service")
        ));
        return Ok(());
    }

    let journal = host::command_output("journalctl", &["-b", "-u", unit, "-o", "cat", "--no-pager"]).await?;
    for error in host::collect_service_errors(&journal) {
        ctx.failure(error);
    }
    Ok(())
}

pub async fn check_cpu_usage(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let output = host::command_output("top", &["-n", "1", "-b", "-i"]).await?;
    let config = &env.config.host;
    for process in host::parse_top(&output) {
        if config.cpu_whitelist.iter().any(|allowed| *allowed == process.command) {
            continue;
        }
        if process.cpu_percent > config.max_cpu_percent {
            ctx.failure(format_args!(
                "high CPU usage ({:.1}%) detected: {} (PID {})",
                process.cpu_percent, process.command, process.pid
            ));
        }
    }
    Ok(())
}

pub async fn check_boot_duration(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let output = host::command_output("systemd-analyze", &[]).await?;
    let duration = host::parse_boot_duration(&output).ok_or_else(|| HostError::Unparseable {
        program: "systemd-analyze".to_string(),
        detail: output.trim().to_string(),
    })?;

    if duration > env.config.host.max_boot_seconds {
        ctx.failure(format_args!(
            "long boot duration: {:.2}s (systemd-analyze for analyzing)",
            duration
        ));
    }
    Ok(())
}
