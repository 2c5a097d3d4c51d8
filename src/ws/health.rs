use std::sync::Arc;

#[cfg(feature = "health-check")]
pub use self::http::HttpHealthProbe;
use super::config::HealthCheckConfig;
use super::endpoint::Endpoint;
use super::traits::HealthProbe;
use crate::Result;
use crate::types::Url;

/// Build the probe described by `config`, if any.
///
/// Without a URL or path, or without the `health-check` feature, no probe is built and
/// every health-check tick counts as healthy.
pub(crate) fn probe_for(
    config: Option<&HealthCheckConfig>,
    endpoint: &Endpoint,
) -> Result<Option<Arc<dyn HealthProbe>>> {
    let Some(url) = probe_url(config, endpoint)? else {
        return Ok(None);
    };

    #[cfg(feature = "health-check")]
    {
        Ok(Some(Arc::new(HttpHealthProbe::new(url))))
    }

    #[cfg(not(feature = "health-check"))]
    {
        #[cfg(feature = "tracing")]
        tracing::warn!(%url, "health-check feature disabled, probing is skipped");
        #[cfg(not(feature = "tracing"))]
        let _ = &url;
        Ok(None)
    }
}

fn probe_url(config: Option<&HealthCheckConfig>, endpoint: &Endpoint) -> Result<Option<Url>> {
    let Some(config) = config else {
        return Ok(None);
    };

    match (&config.url, &config.path) {
        (Some(url), _) => Ok(Some(url.clone())),
        (None, Some(path)) => endpoint.http_url(path).map(Some),
        (None, None) => Ok(None),
    }
}

#[cfg(feature = "health-check")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use crate::ws::traits::HealthProbe;

    const PROBE_TIMEOUT_DURATION: Duration = Duration::from_secs(5);

    /// Health probe that expects a 2xx answer to `GET <url>`.
    #[derive(Debug, Clone)]
    pub struct HttpHealthProbe {
        client: reqwest::Client,
        url: Url,
    }

    impl HttpHealthProbe {
        #[must_use]
        pub fn new(url: Url) -> Self {
            Self::with_client(reqwest::Client::new(), url)
        }

        /// Reuse an existing HTTP client, e.g. one configured with proxies.
        #[must_use]
        pub fn with_client(client: reqwest::Client, url: Url) -> Self {
            Self { client, url }
        }

        #[must_use]
        pub fn url(&self) -> &Url {
            &self.url
        }
    }

    #[async_trait]
    impl HealthProbe for HttpHealthProbe {
        async fn is_healthy(&self) -> bool {
            let response = self
                .client
                .get(self.url.clone())
                .timeout(PROBE_TIMEOUT_DURATION)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let healthy = response.status().is_success();
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %self.url, status = %response.status(), healthy, "Health probe answered");
                    healthy
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %self.url, error = %e, "Health probe failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    false
                }
            }
        }
    }
}
