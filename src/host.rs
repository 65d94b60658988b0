//! Local host inspection: running system tools and making sense of their output.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Total at the end of the `systemd-analyze` summary, e.g. `= 1min 6.5s` or `= 950ms`.
static BOOT_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)=\s*(?:(\d+)min\s+)?([\d.]+)(ms|s)\s*$").expect("boot total pattern")
});

/// Node log line, `[ERROR] [1546438131.527]: message`.
static NODE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)\[(FATAL|ERROR)\] \[\d+\.\d+\]: (.*)$").expect("node error pattern")
});

#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected {program} output: {detail}")]
    Unparseable { program: String, detail: String },
}

/// Run `program` with `args` and return its standard output.
pub async fn command_output(program: &str, args: &[&str]) -> Result<String, HostError> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| HostError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(HostError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether a process with exactly this name (as in `/proc/<pid>/comm`) is running.
pub async fn is_process_running(name: &str) -> Result<bool, HostError> {
    let proc_read = |source| HostError::Read {
        path: "/proc".to_string(),
        source,
    };
    let mut entries = tokio::fs::read_dir("/proc").await.map_err(proc_read)?;
    while let Some(entry) = entries.next_entry().await.map_err(proc_read)? {
        let is_pid = entry
            .file_name()
            .to_str()
            .is_some_and(|pid| pid.bytes().all(|b| b.is_ascii_digit()));
        if !is_pid {
            continue;
        }
        // the process may be gone by now
        if let Ok(comm) = tokio::fs::read_to_string(entry.path().join("comm")).await {
            if comm.trim_end() == name {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

pub async fn read_version_file(path: &Path) -> Result<String, HostError> {
    tokio::fs::read_to_string(path)
        .await
        .map(|text| text.trim().to_string())
        .map_err(|source| HostError::Read {
            path: path.display().to_string(),
            source,
        })
}

/// Total boot time in seconds from `systemd-analyze` output, e.g.
/// `Startup finished in 2.3s (kernel) + 1min 4.2s (userspace) = 1min 6.5s`.
pub fn parse_boot_duration(output: &str) -> Option<f64> {
    let captures = BOOT_TOTAL.captures(output)?;
    let minutes = match captures.get(1) {
        Some(m) => m.as_str().parse::<f64>().ok()?,
        None => 0.0,
    };
    let value = captures.get(2)?.as_str().parse::<f64>().ok()?;
    let seconds = match captures.get(3)?.as_str() {
        "ms" => value / 1000.0,
        _ => value,
    };
    Some(minutes * 60.0 + seconds)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLoad {
    pub pid: u32,
    pub cpu_percent: f64,
    pub command: String,
}

/// Process rows from batch-mode `top` output.
pub fn parse_top(output: &str) -> Vec<ProcessLoad> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("PID"))
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 12 {
                return None;
            }
            Some(ProcessLoad {
                pid: columns[0].parse().ok()?,
                cpu_percent: columns[8].replace(',', ".").parse().ok()?,
                command: columns[11..].join(" "),
            })
        })
        .collect()
}

/// Service active state as reported by `systemctl show -p ActiveState --value`.
pub fn is_service_down(active_state: &str) -> bool {
    matches!(active_state.trim(), "inactive" | "failed")
}

/// Distinct error messages a service logged since its last (re)start.
///
/// Expects `journalctl -o cat` lines. Node log lines look like
/// `[ERROR] [1546438131.527]: message`; a start or stop of the unit clears
/// everything collected before it.
pub fn collect_service_errors(journal: &str) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();
    for line in journal.lines() {
        if line.starts_with("Started ") || line.starts_with("Stopped ") {
            errors.clear();
            continue;
        }
        if let Some(captures) = NODE_ERROR.captures(line) {
            let message = captures[3].to_string();
            if !errors.contains(&message) {
                errors.push(message);
            }
        }
    }
    errors
}
