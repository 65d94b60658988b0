//! Sequential, isolated probe execution.
//!
//! Probes are not expected to be well behaved: a probe body may return an error, panic,
//! or hang. [`run_isolated`] contains all three and always produces a report, and
//! [`ProbeRunner::run`] never stops early because of one probe.

use std::any::Any;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::bridge::BridgeError;
use crate::diagnostics::{DiagnosticContext, Findings};
use crate::host::HostError;
use crate::BoxFuture;

/// Unexpected fault inside a probe body. Expected problems with the checked subsystem
/// are findings, reported through [`DiagnosticContext::failure`], not errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("{0}")]
    Unexpected(String),
}

pub type ProbeResult = Result<(), ProbeError>;
type ProbeBody<E> = Box<dyn Fn(Arc<E>, DiagnosticContext) -> BoxFuture<'static, ProbeResult> + Send + Sync>;

/// A named diagnostic check over an environment `E`.
pub struct Probe<E> {
    name: &'static str,
    body: ProbeBody<E>,
}

impl<E> Probe<E>
where
    E: Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: Fn(Arc<E>, DiagnosticContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        Self {
            name,
            body: Box::new(move |env, ctx| Box::pin(body(env, ctx))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Nothing to report.
    Ok,
    /// Failures and/or infos, each already logged when it was reported.
    Reported(Findings),
    /// The probe itself failed; its findings are not used for the outcome.
    Errored { error: String },
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub name: String,
    pub outcome: ProbeOutcome,
    pub elapsed: Duration,
}

impl ProbeReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Ok)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Errored { .. })
    }

    /// True when the probe found a problem or could not complete.
    pub fn is_failing(&self) -> bool {
        match &self.outcome {
            ProbeOutcome::Ok => false,
            ProbeOutcome::Reported(findings) => !findings.failures.is_empty(),
            ProbeOutcome::Errored { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ok: usize,
    pub reported: usize,
    pub failing: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn from_reports(reports: &[ProbeReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match report.outcome {
                ProbeOutcome::Ok => summary.ok += 1,
                ProbeOutcome::Reported(_) => summary.reported += 1,
                ProbeOutcome::Errored { .. } => summary.errored += 1,
            }
            if report.is_failing() {
                summary.failing += 1;
            }
        }
        summary
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn error_chain(e: &dyn StdError) -> String {
    let mut chain = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Run one probe with a fresh context, containing errors, panics and overruns.
pub async fn run_isolated<E>(probe: &Probe<E>, env: Arc<E>, deadline: Duration) -> ProbeReport
where
    E: Send + Sync + 'static,
{
    let name = probe.name;
    let started = Instant::now();
    let ctx = DiagnosticContext::new(name);

    let task = tokio::spawn((probe.body)(env, ctx.clone()));
    let abort = task.abort_handle();

    let outcome = match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Ok(()))) => {
            let findings = ctx.findings();
            if findings.is_empty() {
                info!("{}: OK", name);
                ProbeOutcome::Ok
            } else {
                ProbeOutcome::Reported(findings)
            }
        }
        Ok(Ok(Err(e))) => {
            error!("{}: exception occurred: {}", name, error_chain(&e));
            error!("{}: {:?}", name, e);
            ProbeOutcome::Errored { error: e.to_string() }
        }
        Ok(Err(join_error)) => {
            let error = if join_error.is_panic() {
                format!("panicked: {}", panic_message(join_error.into_panic()))
            } else {
                "cancelled".to_string()
            };
            error!("{}: exception occurred: {}", name, error);
            ProbeOutcome::Errored { error }
        }
        Err(_) => {
            abort.abort();
            let error = format!("did not finish within {:?}", deadline);
            error!("{}: exception occurred: {}", name, error);
            ProbeOutcome::Errored { error }
        }
    };

    ProbeReport {
        name: name.to_string(),
        outcome,
        elapsed: started.elapsed(),
    }
}

/// Keep the probes named in `only` (all when empty), minus those named in `skip`.
/// Names compare case-insensitively; unknown names are logged and ignored.
pub fn select_probes<E>(probes: Vec<Probe<E>>, only: &[String], skip: &[String]) -> Vec<Probe<E>> {
    let known = |wanted: &String| probes.iter().any(|p| p.name.eq_ignore_ascii_case(wanted));
    for wanted in only.iter().chain(skip) {
        if !known(wanted) {
            warn!("Unknown probe '{}' ignored", wanted);
        }
    }

    let listed = |names: &[String], probe: &Probe<E>| names.iter().any(|n| probe.name.eq_ignore_ascii_case(n));
    probes
        .into_iter()
        .filter(|probe| only.is_empty() || listed(only, probe))
        .filter(|probe| !listed(skip, probe))
        .collect()
}

pub struct ProbeRunner {
    deadline: Duration,
}

impl ProbeRunner {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Run `probes` one after another, in order, and report on each.
    pub async fn run<E>(&self, env: Arc<E>, probes: &[Probe<E>]) -> Vec<ProbeReport>
    where
        E: Send + Sync + 'static,
    {
        let mut reports = Vec::with_capacity(probes.len());
        for probe in probes {
            reports.push(run_isolated(probe, Arc::clone(&env), self.deadline).await);
        }
        reports
    }
}
