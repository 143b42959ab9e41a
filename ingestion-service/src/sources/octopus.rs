use std::time::Duration;

use reqwest::{header::RETRY_AFTER, RequestBuilder, StatusCode};
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};
use usage_client::MeterPoint;

use crate::{
    config::OctopusConfig,
    pipeline::PipelineError,
    sources::paginated::{ConsumptionApi, ConsumptionPage, PageCursor},
};

/// HTTP client for the Octopus Energy consumption endpoint.
///
/// Authenticates with the account API key as the basic-auth user name.
/// Transient failures (connection errors, timeouts, 5xx, 429) are retried up
/// to `max_retries` times with exponential backoff before being surfaced.
pub struct OctopusClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    max_retries: u32,
    retry_backoff: Duration,
}

impl OctopusClient {
    pub fn new(cfg: &OctopusConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            page_size: cfg.page_size,
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        })
    }

    fn consumption_url(&self, meter: &MeterPoint) -> String {
        format!(
            "{}/v1/electricity-meter-points/{}/meters/{}/consumption/",
            self.base_url,
            meter.mpan(),
            meter.serial()
        )
    }

    fn request(&self, meter: &MeterPoint, cursor: &PageCursor) -> Result<RequestBuilder, PipelineError> {
        let builder = match cursor {
            PageCursor::First(period) => {
                let params = [
                    ("period_from", format_instant(period.start())?),
                    ("period_to", format_instant(period.end())?),
                    ("page_size", self.page_size.to_string()),
                    ("order_by", "period".to_string()),
                ];
                self.http.get(self.consumption_url(meter)).query(&params)
            }
            PageCursor::Next(url) => self.http.get(url),
        };

        Ok(builder.basic_auth(&self.api_key, None::<&str>))
    }

    async fn send_once(&self, request: RequestBuilder) -> Result<ConsumptionPage, PipelineError> {
        let response = request.send().await.map_err(|e| PipelineError::Upstream {
            status: e.status().map(|s| s.as_u16()),
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(PipelineError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "octopus api error");
            return Err(PipelineError::Upstream {
                status: Some(status.as_u16()),
                transient: status.is_server_error(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        response
            .json::<ConsumptionPage>()
            .await
            .map_err(|e| PipelineError::Upstream {
                status: Some(status.as_u16()),
                transient: !e.is_decode(),
                message: format!("failed to read consumption page: {e}"),
            })
    }
}

#[async_trait::async_trait]
impl ConsumptionApi for OctopusClient {
    async fn fetch_page(
        &self,
        meter: &MeterPoint,
        cursor: &PageCursor,
    ) -> Result<ConsumptionPage, PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            tracing::debug!(?cursor, attempt, "octopus api request");
            match self.send_once(self.request(meter, cursor)?).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let sleep_for = match &e {
                        PipelineError::RateLimited {
                            retry_after: Some(after),
                        } => *after,
                        _ => self.retry_backoff * 2u32.saturating_pow(attempt),
                    };
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        backoff_ms = sleep_for.as_millis() as u64,
                        "octopus request failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Octopus expects `Z`-suffixed UTC timestamps.
fn format_instant(ts: OffsetDateTime) -> Result<String, PipelineError> {
    ts.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| PipelineError::Config(format!("cannot format timestamp {ts}: {e}")))
}
