//! Fire-and-forget completion callbacks for full-sync jobs.

use std::sync::Arc;

use portal_core::FullSyncJob;
use portal_storage::HttpFetcher;
use tracing::{info, warn};

/// Fire-and-forget completion callbacks. Failures are logged and never retried.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Arc<HttpFetcher>,
}

impl WebhookNotifier {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self { http }
    }

    pub fn notify(&self, url: String, job: FullSyncJob) -> tokio::task::JoinHandle<()> {
        let http = self.http.clone();
        tokio::spawn(async move {
            match http.post_json(&url, &job).await {
                Ok(status) => info!(job_id = %job.job_id, %status, "webhook delivered"),
                Err(err) => warn!(job_id = %job.job_id, error = %err, "webhook delivery failed"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use portal_core::{FullSyncConfig, JobId};
    use portal_storage::HttpClientConfig;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn posts_job_summary_as_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut read = 0;
            loop {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                read += n;
                let text = String::from_utf8_lossy(&buf[..read]).to_string();
                if n == 0 || text.contains("\"jobId\"") && text.trim_end().ends_with('}') {
                    break;
                }
            }
            let reply = "HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n";
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..read]).to_string()
        });

        let http = Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(2),
                ..Default::default()
            })
            .unwrap(),
        );
        let job = FullSyncJob::pending(JobId::new(), FullSyncConfig::default(), Utc::now());
        let job_id = job.job_id;
        WebhookNotifier::new(http)
            .notify(format!("http://{addr}/hook"), job)
            .await
            .unwrap();

        let request = received.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains(&job_id.to_string()));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_only_logged() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let job = FullSyncJob::pending(JobId::new(), FullSyncConfig::default(), Utc::now());
        let handle = WebhookNotifier::new(http).notify("http://127.0.0.1:9/hook".into(), job);
        assert!(handle.await.is_ok());
    }
}
