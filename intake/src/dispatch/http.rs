use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{DispatchMessage, DispatchQueue, QueueError};

/// Publishes jobs to a broker over HTTP: `POST {base}/queues/{channel}/jobs`
/// with the message as a JSON body. Any 2xx counts as accepted.
#[derive(Debug, Clone)]
pub struct HttpQueue {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpQueue {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(cfg: &common::AppConfig) -> Result<Self, QueueError> {
        Self::new(
            &cfg.dispatch_url,
            Duration::from_millis(cfg.publish_timeout_ms),
        )
    }

    pub fn jobs_url(&self, channel: &str) -> String {
        format!("{}/queues/{}/jobs", self.base_url, channel)
    }
}

#[async_trait]
impl DispatchQueue for HttpQueue {
    async fn publish(&self, channel: &str, message: &DispatchMessage) -> Result<(), QueueError> {
        let resp = self
            .client
            .post(self.jobs_url(channel))
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueueError::Timeout(self.timeout)
                } else {
                    QueueError::Unavailable(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(QueueError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_url() {
        let queue = HttpQueue::new("http://broker:3001/", Duration::from_secs(1)).unwrap();
        assert_eq!(queue.jobs_url("jvm"), "http://broker:3001/queues/jvm/jobs");
    }
}
