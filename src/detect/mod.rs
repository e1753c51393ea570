mod backend;
mod backends;
mod category;
mod result;

pub use backend::DetectorBackend;
pub use backends::{parse_script, CrowdConfig, ScriptedBackend, SyntheticCrowdBackend};
pub use category::{
    default_specs, CategoryMap, CategorySpec, UnmappedPolicy, UNMAPPED_CATEGORY,
};
pub use result::Detection;
