//! HTTP client for the remote detection/optimization service.
//!
//! The service is treated as untrusted: every call has a timeout, redirects
//! are refused, response bodies are read up to a fixed cap, and decoded
//! payloads are validated before they reach the controller. Any failure on
//! this path maps to `ServiceUnavailable` so the controller can degrade to
//! local generation.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;
use sungrid_core::config::ServiceConfig;
use sungrid_core::{
    DetectionResult, PanelService, Result, SimulationRequest, SimulationResult, SungridError,
};

/// Maximum response body size read from the service (1 MiB).
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// A decoded HTTP response: status code plus the (capped) body bytes.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam under `RemoteClient`, swappable in tests.
pub trait HttpBackend: Send + Sync {
    /// POST a single file as `multipart/form-data`.
    fn post_multipart(
        &self,
        url: &str,
        field: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<HttpResponse>;

    /// POST a JSON body.
    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse>;

    /// Plain GET.
    fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Production backend over a blocking `reqwest` client.
pub struct ReqwestBackend {
    client: reqwest::blocking::Client,
}

impl ReqwestBackend {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        if timeout_ms == 0 {
            return Err(SungridError::ConfigError("timeout_ms must be > 0".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| {
                SungridError::ConfigError(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    fn read_response(response: reqwest::blocking::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| {
                SungridError::ServiceUnavailable(format!("failed to read response body: {}", e))
            })?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpBackend for ReqwestBackend {
    fn post_multipart(
        &self,
        url: &str,
        field: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<HttpResponse> {
        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(filename.to_string());
        let form = reqwest::blocking::multipart::Form::new().part(field.to_string(), part);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(|e| SungridError::ServiceUnavailable(format!("network error: {}", e)))?;
        Self::read_response(response)
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| SungridError::ServiceUnavailable(format!("network error: {}", e)))?;
        Self::read_response(response)
    }

    fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| SungridError::ServiceUnavailable(format!("network error: {}", e)))?;
        Self::read_response(response)
    }
}

/// Detection response on the wire. Unknown fields (e.g. the service's
/// human-readable `message`) are ignored.
#[derive(Deserialize)]
struct DetectWire {
    total_panels: u32,
    hotspot_panels: Vec<u32>,
    #[serde(default)]
    annotated_image: Option<String>,
}

/// Simulation response on the wire. The service reports damage under
/// `total_damage_percent` and efficiency under `efficiency`, and counts
/// every inactive panel (hotspots included) in `panels_off`.
#[derive(Deserialize)]
struct SimulateWire {
    panels_on: Vec<u32>,
    panels_off: Vec<u32>,
    hotspot_panels: Vec<u32>,
    #[serde(rename = "total_damage_percent", default)]
    damage_percent: f64,
    #[serde(rename = "efficiency")]
    efficiency_percent: f64,
}

#[derive(Deserialize)]
struct HealthWire {
    status: String,
}

/// Client for the remote detection/optimization service.
pub struct RemoteClient {
    base_url: String,
    backend: Box<dyn HttpBackend>,
}

impl RemoteClient {
    /// Create a client over the production `reqwest` backend.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(SungridError::ConfigError(format!(
                "base_url must be http(s), got {:?}",
                config.base_url
            )));
        }
        let backend = ReqwestBackend::new(config.timeout_ms)?;
        Ok(Self::with_backend(&config.base_url, Box::new(backend)))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_backend(base_url: &str, backend: Box<dyn HttpBackend>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            backend,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Probe the service's health endpoint. `Ok(false)` means the endpoint
    /// answered but did not report itself healthy; transport failures
    /// propagate as errors.
    pub fn health(&self) -> Result<bool> {
        let response = self.backend.get(&self.url("/health"))?;
        if !response.is_success() {
            return Ok(false);
        }
        let wire: HealthWire = serde_json::from_slice(&response.body).map_err(|e| {
            SungridError::ServiceUnavailable(format!("malformed health response: {}", e))
        })?;
        Ok(wire.status == "healthy")
    }
}

fn ensure_success(response: &HttpResponse, what: &str) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(SungridError::ServiceUnavailable(format!(
            "{} returned HTTP {}",
            what, response.status
        )))
    }
}

impl PanelService for RemoteClient {
    fn detect(&self, image: &[u8], filename: &str) -> Result<DetectionResult> {
        let response =
            self.backend
                .post_multipart(&self.url("/detect"), "file", filename, image.to_vec())?;
        ensure_success(&response, "detect")?;

        let wire: DetectWire = serde_json::from_slice(&response.body).map_err(|e| {
            SungridError::ServiceUnavailable(format!("malformed detect response: {}", e))
        })?;
        let result = DetectionResult {
            total_panels: wire.total_panels,
            hotspot_panels: wire.hotspot_panels.into_iter().collect(),
            annotated_image: wire.annotated_image,
        };
        result.validate().map_err(|e| {
            SungridError::ServiceUnavailable(format!("detect response rejected: {}", e))
        })?;
        tracing::debug!(
            total_panels = result.total_panels,
            hotspots = result.hotspot_panels.len(),
            "detection received"
        );
        Ok(result)
    }

    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationResult> {
        let body = serde_json::to_value(request).map_err(|e| {
            SungridError::InvalidInput(format!("unencodable simulation request: {}", e))
        })?;
        let response = self.backend.post_json(&self.url("/simulate"), &body)?;
        ensure_success(&response, "simulate")?;

        let wire: SimulateWire = serde_json::from_slice(&response.body).map_err(|e| {
            SungridError::ServiceUnavailable(format!("malformed simulate response: {}", e))
        })?;

        // Normalize to disjoint sets: hotspot membership wins, and ids the
        // service left in both on and off stay on.
        let hotspot_panels: BTreeSet<u32> = wire.hotspot_panels.into_iter().collect();
        let panels_on: BTreeSet<u32> = wire
            .panels_on
            .into_iter()
            .filter(|id| !hotspot_panels.contains(id))
            .collect();
        let panels_off: BTreeSet<u32> = wire
            .panels_off
            .into_iter()
            .filter(|id| !hotspot_panels.contains(id) && !panels_on.contains(id))
            .collect();

        let result = SimulationResult {
            panels_on,
            panels_off,
            hotspot_panels,
            damage_percent: wire.damage_percent,
            efficiency_percent: wire.efficiency_percent,
        };
        result.validate(request.total_panels).map_err(|e| {
            SungridError::ServiceUnavailable(format!("simulate response rejected: {}", e))
        })?;
        tracing::debug!(
            on = result.panels_on.len(),
            efficiency = result.efficiency_percent,
            "simulation result received"
        );
        Ok(result)
    }
}
