#![forbid(unsafe_code)]

use crate::entry::framing::{read_content_length_frame, write_content_length_json};
use gm_core::health::HealthStatus;
use gm_core::retry::{RetryOutcome, RetryPolicy, retry_until};
use serde_json::Value;
use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const HEALTH_METHOD: &str = "health_check";
pub(crate) const HEALTH_OK: &str = "ok";

/// Liveness probe against the backend endpoint.
///
/// A connection refusal or missing address fails on the spot; only the interval between
/// attempts in [`HealthProbe::wait_until_healthy`] ever sleeps.
#[derive(Clone, Debug)]
pub(crate) struct HealthProbe {
    socket_path: PathBuf,
    io_timeout: Duration,
}

impl HealthProbe {
    pub(crate) fn new(socket_path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            io_timeout,
        }
    }

    /// One request, never an error: every failure collapses into `Unhealthy`.
    pub(crate) fn check(&self) -> HealthStatus {
        match self.request_health() {
            Ok(resp) if is_healthy_response(&resp) => HealthStatus::Healthy,
            Ok(resp) => {
                tracing::debug!(socket = %self.socket_path.display(), %resp, "backend answered but is not healthy");
                HealthStatus::Unhealthy
            }
            Err(err) => {
                tracing::debug!(socket = %self.socket_path.display(), error = %err, "health probe failed");
                HealthStatus::Unhealthy
            }
        }
    }

    /// `Healthy` on the first good answer, `Exhausted` once the budget is spent.
    pub(crate) fn wait_until_healthy(&self, policy: RetryPolicy) -> HealthStatus {
        let outcome = retry_until(policy, std::thread::sleep, |attempt| {
            let status = self.check();
            tracing::trace!(attempt, status = status.as_str(), "health attempt");
            status.is_healthy().then_some(())
        });
        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                tracing::debug!(attempts, "backend healthy");
                HealthStatus::Healthy
            }
            RetryOutcome::Exhausted { attempts } => {
                tracing::debug!(attempts, "health probe exhausted");
                HealthStatus::Exhausted
            }
        }
    }

    fn request_health(&self) -> Result<Value, Box<dyn std::error::Error>> {
        let stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;

        let mut writer = &stream;
        write_content_length_json(&mut writer, &crate::json_rpc_request(0, HEALTH_METHOD))?;
        let mut reader = BufReader::new(&stream);
        let Some(body) = read_content_length_frame(&mut reader, None)? else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "backend closed during health probe",
            )
            .into());
        };
        Ok(serde_json::from_slice::<Value>(&body)?)
    }
}

fn is_healthy_response(resp: &Value) -> bool {
    resp.get("error").is_none()
        && resp
            .get("result")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            == Some(HEALTH_OK)
}
