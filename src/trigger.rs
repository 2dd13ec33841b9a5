//! Outbound trigger that asks the remote worker to start the job.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TriggerError;

const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts the remote job. Fired once per admission and never retried.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    async fn fire(&self, requester: &str) -> Result<(), TriggerError>;
}

/// Triggers the job with a JSON POST to a fixed endpoint.
pub struct HttpTrigger {
    url: String,
    job_name: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTrigger {
    pub fn new(url: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            job_name: job_name.into(),
            timeout: DEFAULT_TRIGGER_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn body(&self, requester: &str) -> serde_json::Value {
        serde_json::json!({
            "requested_by": requester,
            "job": self.job_name,
        })
    }
}

#[async_trait]
impl JobTrigger for HttpTrigger {
    async fn fire(&self, requester: &str) -> Result<(), TriggerError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&self.body(requester))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TriggerError::Timeout {
                        url: self.url.clone(),
                        timeout: self.timeout,
                    }
                } else {
                    TriggerError::RequestFailed {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !resp.status().is_success() {
            return Err(TriggerError::Rejected {
                url: self.url.clone(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}
