use crate::driver::TaskDriver;
use crate::error::BridgeError;
use crate::fetch::HttpFetch;
use crate::loader::{Loader, WasmApplication};
use crate::metrics::{DriverMetricsSink, NoopMetricsSink};
use ferry_abi::{HttpRequest, HttpResponse};
use ferry_config::{DriverConfig, GatewayConfig};
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Served by the guest.
    Application,
    /// Forwarded unchanged to the network.
    Passthrough,
}

/// Front door for inbound requests: requests for the application's origin and
/// path prefix are driven through the guest, everything else is fetched
/// directly.
pub struct Gateway {
    loader: Arc<Loader>,
    fetch: Arc<dyn HttpFetch>,
    config: GatewayConfig,
    driver_config: DriverConfig,
    metrics: Arc<dyn DriverMetricsSink>,
    driver: OnceCell<TaskDriver<WasmApplication>>,
}

impl Gateway {
    pub fn new(
        loader: Arc<Loader>,
        fetch: Arc<dyn HttpFetch>,
        config: GatewayConfig,
        driver_config: DriverConfig,
    ) -> Self {
        Self {
            loader,
            fetch,
            config,
            driver_config,
            metrics: Arc::new(NoopMetricsSink),
            driver: OnceCell::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn DriverMetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn route(&self, url: &Url) -> Route {
        if let Some(origin) = &self.config.origin {
            if origin.origin() != url.origin() {
                return Route::Passthrough;
            }
        }

        let prefix = self.config.app_prefix.as_str();
        let path = url.path();
        let under_prefix = prefix == "/"
            || path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        if under_prefix {
            Route::Application
        } else {
            Route::Passthrough
        }
    }

    pub async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        let url = Url::parse(&request.url).map_err(|err| {
            BridgeError::InvalidArgument(format!("invalid request url {:?}: {err}", request.url))
        })?;

        match self.route(&url) {
            Route::Application => {
                tracing::debug!(url = %url, "routing request to the guest");
                self.driver().await?.handle(request).await
            }
            Route::Passthrough => {
                tracing::debug!(url = %url, "passing request through");
                Ok(self.fetch.fetch(request).await?)
            }
        }
    }

    async fn driver(&self) -> Result<&TaskDriver<WasmApplication>, BridgeError> {
        self.driver
            .get_or_try_init(|| async {
                let app = self.loader.load().await?;
                Ok::<_, BridgeError>(
                    TaskDriver::new(app, self.fetch.clone(), self.driver_config.clone())
                        .with_metrics(self.metrics.clone()),
                )
            })
            .await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("loader", &self.loader)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
