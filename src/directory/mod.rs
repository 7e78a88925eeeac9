//! Agent directory: records, liveness states and the registry that owns them

mod agent;
mod registry;

pub use agent::{
    normalize_context_summary, validate_agent_id, AgentRecord, AgentStatus, Liveness,
    MAX_AGENT_ID_LEN,
};
pub use registry::{AgentDirectory, LivenessPolicy};
