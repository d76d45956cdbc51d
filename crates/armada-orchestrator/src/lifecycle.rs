//! Lifecycle check execution.
//!
//! Checks gate the success of container transitions. Each check is
//! re-attempted at a one second cadence until it passes or its budget is
//! exhausted; all checks of a slot must pass. Check types are dispatched on
//! the `type` tag of their configuration record: `tcp`, `http`, `exec`,
//! `rexec` and `sleep`.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use armada_core::checks::CheckDef;
use armada_core::container::ContainerSpec;
use armada_core::discovery;
use armada_core::environment::Environment;
use armada_core::error::ConfigError;

use crate::error::{OrchestratorError, Result};
use crate::runtime::ContainerRuntime;

/// Delay between check attempts.
const ATTEMPT_DELAY: Duration = Duration::from_secs(1);

/// Timeout of a single TCP connect attempt.
const TCP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout of a single HTTP request attempt.
const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// The lifecycle slot a check gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Gates start and restart.
    Running,
    /// Gates stop.
    Stopped,
}

impl Slot {
    /// Returns the slot name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Everything a check needs to probe its container.
pub struct CheckContext<'a> {
    /// The environment the container belongs to.
    pub environment: &'a Environment,

    /// The container being gated.
    pub container: &'a ContainerSpec,

    /// The runtime of the container's ship, for `rexec` checks.
    pub runtime: Arc<dyn ContainerRuntime>,
}

/// Runs every check of a slot to completion.
///
/// Returns `Ok(true)` when checks were configured and all passed, and
/// `Ok(false)` when the slot has no checks (the caller then falls back to
/// the daemon-reported state). A check that exhausts its budget yields a
/// lifecycle timeout error.
pub async fn verify(slot: Slot, ctx: &CheckContext<'_>) -> Result<bool> {
    let checks = match slot {
        Slot::Running => &ctx.container.checks.running,
        Slot::Stopped => &ctx.container.checks.stopped,
    };
    if checks.is_empty() {
        return Ok(false);
    }

    futures::future::try_join_all(checks.iter().map(|check| run_check(slot, check, ctx))).await?;
    Ok(true)
}

async fn run_check(slot: Slot, check: &CheckDef, ctx: &CheckContext<'_>) -> Result<()> {
    let attempts = check.budget().attempts();

    for attempt in 1..=attempts {
        if attempt_once(check, ctx).await? {
            debug!(
                container = %ctx.container.name,
                check = check.kind(),
                attempt,
                "Lifecycle check passed"
            );
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(ATTEMPT_DELAY).await;
        }
    }

    Err(OrchestratorError::lifecycle(
        &ctx.container.name,
        slot.name(),
        format!("{} check did not pass within {} attempts", check.kind(), attempts),
    ))
}

/// One attempt of a check. `Ok(false)` is a failed attempt (retried);
/// errors are configuration problems and fail fast.
async fn attempt_once(check: &CheckDef, ctx: &CheckContext<'_>) -> Result<bool> {
    match check {
        CheckDef::Tcp { port, host, .. } => {
            let (host, port) = probe_target(ctx, host.as_deref(), port)?;
            let connect = TcpStream::connect((host.as_str(), port));
            match tokio::time::timeout(TCP_ATTEMPT_TIMEOUT, connect).await {
                Ok(Ok(_)) => Ok(true),
                _ => Ok(false),
            }
        }

        CheckDef::Http {
            port,
            host,
            path,
            method,
            scheme,
            match_regex,
            ..
        } => {
            let (host, port) = probe_target(ctx, host.as_deref(), port)?;
            let url = format!("{}://{}:{}{}", scheme, host, port, path);

            let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
                ConfigError::invalid_check(
                    &ctx.container.name,
                    format!("invalid http method {:?}", method),
                )
            })?;
            let pattern = match_regex
                .as_deref()
                .map(regex::Regex::new)
                .transpose()
                .map_err(|e| {
                    ConfigError::invalid_check(
                        &ctx.container.name,
                        format!("invalid match_regex: {}", e),
                    )
                })?;

            let client = reqwest::Client::builder()
                .timeout(HTTP_ATTEMPT_TIMEOUT)
                .build()
                .map_err(|e| OrchestratorError::daemon_reason(&ctx.container.ship, e.to_string()))?;

            let response = match client.request(method, &url).send().await {
                Ok(response) => response,
                Err(_) => return Ok(false),
            };

            match pattern {
                Some(pattern) => {
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(_) => return Ok(false),
                    };
                    Ok(pattern.is_match(&body))
                }
                None => Ok(response.status() == reqwest::StatusCode::OK),
            }
        }

        CheckDef::Exec { command, .. } => {
            let env = discovery::container_environment(ctx.environment, ctx.container);
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .envs(env)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await?;
            Ok(status.success())
        }

        CheckDef::Rexec { command, .. } => {
            let cmd = vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()];
            match ctx.runtime.exec(&ctx.container.name, &cmd).await {
                Ok(output) => Ok(output.success()),
                Err(_) => Ok(false),
            }
        }

        CheckDef::Sleep { wait } => {
            tokio::time::sleep(Duration::from_secs(*wait)).await;
            Ok(true)
        }
    }
}

/// Resolves the probe target of a tcp/http check: explicit host or the
/// ship's address, and a named port (external side) or a literal number.
fn probe_target(ctx: &CheckContext<'_>, host: Option<&str>, port: &str) -> Result<(String, u16)> {
    let host = match host {
        Some(host) => host.to_string(),
        None => ctx.environment.ship_of(ctx.container).address.clone(),
    };

    if let Ok(literal) = port.parse::<u16>() {
        return Ok((host, literal));
    }

    let spec = ctx.container.port(port).ok_or_else(|| {
        ConfigError::invalid_check(
            &ctx.container.name,
            format!("port {:?} is not defined", port),
        )
    })?;
    if !spec.is_tcp() {
        return Err(ConfigError::invalid_check(
            &ctx.container.name,
            format!("port {:?} is not TCP", port),
        )
        .into());
    }

    Ok((host, spec.external_port()))
}
