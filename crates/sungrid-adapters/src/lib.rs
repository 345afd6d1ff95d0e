//! Sungrid Adapters
//!
//! Concrete `PanelService` implementations behind the controller:
//!
//! - `RemoteClient`: HTTP client for the detection/optimization service
//! - `LocalGenerator`: random local stand-in used when the service is
//!   unreachable
//!
//! Both produce results that satisfy the same structural invariants, so
//! the controller and assignment engine never care which one answered.

pub mod fallback;
pub mod remote;

pub use fallback::LocalGenerator;
pub use remote::{HttpBackend, HttpResponse, RemoteClient, ReqwestBackend};

use sungrid_core::{Result, SimulationController, SungridConfig};

/// Wire a controller from configuration: remote client as the primary
/// service, local generator as the fallback.
pub fn controller_from_config(config: &SungridConfig) -> Result<SimulationController> {
    config.validate()?;
    let primary = RemoteClient::new(&config.service)?;
    let fallback = LocalGenerator::new(config.fallback.clone())?;
    Ok(SimulationController::new(
        Box::new(primary),
        Box::new(fallback),
        config.auto_repeat.clone(),
    ))
}
