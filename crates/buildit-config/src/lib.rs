//! KDL configuration parsing for the BuildIt build coordinator.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    CoordinatorConfig, NotifierConfig, ServerConfig, SystemConfig, WorkflowEngineConfig,
    load_system_config, parse_system_config,
};
