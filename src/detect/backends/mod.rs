pub mod scripted;
pub mod synthetic;

pub use scripted::{parse_script, ScriptedBackend};
pub use synthetic::{CrowdConfig, SyntheticCrowdBackend};
