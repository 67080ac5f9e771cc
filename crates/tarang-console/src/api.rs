//! HTTP side of the simulation service.

use std::future::Future;
use std::time::Duration;
use tarang_core::{KillProcessResponse, ProcessId, ProcessStatus, StartSimulationResponse};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

pub trait SimulationApi: Clone + Send + Sync + 'static {
    fn start_simulation(
        &self,
    ) -> impl Future<Output = Result<StartSimulationResponse, ApiError>> + Send;

    fn kill_process(
        &self,
        process_id: &ProcessId,
    ) -> impl Future<Output = Result<KillProcessResponse, ApiError>> + Send;

    fn process_status(
        &self,
        process_id: &ProcessId,
    ) -> impl Future<Output = Result<ProcessStatus, ApiError>> + Send;

    fn submit_run_config(
        &self,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpSimulationApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpSimulationApi {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base))
    }

    pub fn with_client(client: reqwest::Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Shared with the polling transport so both use one connection pool.
    pub fn http_client(&self) -> reqwest::Client {
        self.client.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::Endpoint(format!("{path}: {err}")))
    }
}

impl SimulationApi for HttpSimulationApi {
    fn start_simulation(
        &self,
    ) -> impl Future<Output = Result<StartSimulationResponse, ApiError>> + Send {
        let client = self.client.clone();
        let url = self.endpoint("start_simulation");
        async move {
            let response = client
                .post(url?)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ApiError::Status(status.as_u16()));
            }
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
        }
    }

    fn kill_process(
        &self,
        process_id: &ProcessId,
    ) -> impl Future<Output = Result<KillProcessResponse, ApiError>> + Send {
        let client = self.client.clone();
        let url = self.endpoint(&format!("kill_process/{process_id}"));
        async move {
            // The body carries the verdict even on error statuses.
            let body = client.post(url?).send().await?.text().await?;
            serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
        }
    }

    fn process_status(
        &self,
        process_id: &ProcessId,
    ) -> impl Future<Output = Result<ProcessStatus, ApiError>> + Send {
        let client = self.client.clone();
        let url = self.endpoint(&format!("process_status/{process_id}"));
        async move {
            let response = client.get(url?).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ApiError::Status(status.as_u16()));
            }
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
        }
    }

    fn submit_run_config(
        &self,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        let client = self.client.clone();
        let url = self.endpoint("run_config");
        let fields = fields.to_vec();
        async move {
            let response = client.post(url?).form(&fields).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ApiError::Status(status.as_u16()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_gains_trailing_slash() {
        let base = Url::parse("http://127.0.0.1:5000/tarang").expect("url");
        let api = HttpSimulationApi::with_client(reqwest::Client::new(), base);
        assert_eq!(api.base().as_str(), "http://127.0.0.1:5000/tarang/");
        let url = api.endpoint("kill_process/7").expect("endpoint");
        assert_eq!(url.as_str(), "http://127.0.0.1:5000/tarang/kill_process/7");
    }

    #[test]
    fn status_error_reads_like_fetch_failure() {
        assert_eq!(ApiError::Status(500).to_string(), "HTTP error! status: 500");
    }
}
