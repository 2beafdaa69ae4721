//! Skill registry, external process dispatcher and in-process dialog answers.

pub mod dialog;
pub mod dispatcher;
pub mod registry;

pub use dialog::render_answer;
pub use dispatcher::{BridgeCommand, SkillDispatcher, SkillResult, SkillsConfig};
pub use registry::{DomainEntry, SkillEntry, SkillRegistry};
