//! Flight controller checks driven through the NuttX console.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::diagnostics::DiagnosticContext;
use crate::messages::{msg_id, Heartbeat};
use crate::probes::{Estimator, ProbeEnv};
use crate::runner::ProbeResult;

static FIRMWARE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^FW (git tag|version): (v?\d\.\d\.\d.*)$").expect("firmware version pattern")
});

static CHECK_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)(Preflight|Prearm) check: (.*)$").expect("check result pattern")
});

/// `(field, version)` pairs from `ver all` output, e.g. `("git tag", "v1.9.0-clever")`.
pub fn parse_firmware_versions(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let captures = FIRMWARE_VERSION.captures(line.trim_end_matches('\r'))?;
            Some((captures[1].to_string(), captures[2].to_string()))
        })
        .collect()
}

/// Problems listed in `commander check` output.
pub fn parse_preflight(output: &str) -> Vec<String> {
    let mut problems = Vec::new();
    for line in output.lines().map(|line| line.trim_end_matches('\r')) {
        if line.contains("WARN") {
            // "WARN  [commander] Preflight Fail: ..."
            let text = line.find(']').and_then(|end| line.get(end + 2..)).unwrap_or(line);
            problems.push(text.to_string());
        } else if let Some(captures) = CHECK_RESULT.captures(line) {
            if &captures[3] != "OK" {
                problems.push(format!("{} check: {}", &captures[2], &captures[3]));
            }
        }
    }
    problems
}

pub async fn check_fcu(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let heartbeat = env
        .watch
        .next_decoded(msg_id::HEARTBEAT, env.config.link.heartbeat_timeout(), |payload| {
            Heartbeat::decode(payload).ok().filter(Heartbeat::is_autopilot).ok_or(())
        })
        .await;
    if heartbeat.is_none() {
        ctx.failure("no connection to the FCU (check wiring)");
        return Ok(());
    }

    // an empty line first so the console is ours and the prompt is fresh
    env.shell("\n").await?;
    let version = env.shell("ver all").await?;
    if version.is_empty() {
        ctx.info("no version data available from SITL");
    }

    let tag = &env.config.host.firmware_tag;
    let mut tagged = false;
    for (field, version) in parse_firmware_versions(&version) {
        ctx.info(format_args!("firmware {}: {}", field, version));
        tagged |= version.contains(tag.as_str());
    }
    if !tagged {
        ctx.failure(format_args!("not running {} PX4 firmware", tag));
    }

    match env.estimator(&ctx).await {
        Some(Estimator::Lpe) => {
            ctx.info("selected estimator: LPE");
            if let Some(fusion) = env.param(&ctx, "LPE_FUSION").await {
                if fusion.has_bit(4) {
                    ctx.info("LPE_FUSION: land detector fusion is enabled");
                } else {
                    ctx.info("LPE_FUSION: land detector fusion is disabled");
                }
                if fusion.has_bit(7) {
                    ctx.info("LPE_FUSION: barometer fusion is enabled");
                } else {
                    ctx.info("LPE_FUSION: barometer fusion is disabled");
                }
            }
        }
        Some(Estimator::Ekf2) => ctx.info("selected estimator: EKF2"),
        Some(Estimator::Unknown(value)) => ctx.failure(format_args!("unknown selected estimator: {}", value)),
        None => {}
    }
    Ok(())
}

pub async fn check_preflight_status(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    env.shell("\n").await?;
    let output = env.shell("commander check").await?;
    if output.is_empty() {
        ctx.failure("no data from FCU");
        return Ok(());
    }
    for problem in parse_preflight(&output) {
        ctx.failure(problem);
    }
    Ok(())
}
