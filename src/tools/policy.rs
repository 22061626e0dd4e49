use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The pair governing a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 2,
        }
    }
}

/// Field-wise override, merged on top of the context policy per call.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PolicyOverride {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

impl ExecutionPolicy {
    pub fn merge(self, overrides: &PolicyOverride) -> Self {
        Self {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
        }
    }
}

/// Runs `attempt` up to `max_retries + 1` times, each bounded by
/// `timeout_ms`. Validation errors surface immediately; only transient
/// kinds retry. A zero timeout fails before the handler ever runs.
pub async fn with_execution_policy<T, F, Fut>(
    tool: &str,
    policy: ExecutionPolicy,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if policy.timeout_ms == 0 {
        return Err(Error::Timeout(0));
    }

    let attempts = policy.max_retries.saturating_add(1);
    for attempt in 1..=attempts {
        let outcome =
            tokio::time::timeout(Duration::from_millis(policy.timeout_ms), attempt_fn()).await;
        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout(policy.timeout_ms),
        };
        if !err.is_transient() || attempt == attempts {
            return Err(err);
        }
        tracing::warn!(tool, attempt, error = %err, "tool.retry");
    }
    Err(Error::Internal(format!("{tool}: no attempt ran")))
}
