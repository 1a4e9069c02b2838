pub mod loader;
pub mod metadata;
pub mod ops;
pub mod registry;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;

/// A skill's execution body. Consumers implement this for each skill.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn call(&self, args: &Value) -> Result<Value, String>;
}

/// A registered callable with attached invocation metadata, exposed to a
/// model as an invokable tool.
#[derive(Clone)]
pub struct Skill {
    pub metadata: SkillMetadata,
    handler: Arc<dyn SkillHandler>,
}

impl Skill {
    pub fn new(metadata: SkillMetadata, handler: impl SkillHandler + 'static) -> Self {
        Self {
            metadata,
            handler: Arc::new(handler),
        }
    }

    pub fn builder(name: impl Into<String>) -> SkillBuilder {
        SkillBuilder::new(name)
    }

    /// Pair already-built metadata with a shared handler, as the manifest
    /// loader does.
    pub fn from_arc(metadata: SkillMetadata, handler: Arc<dyn SkillHandler>) -> Self {
        Self { metadata, handler }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Defining-context + simple name, globally unique within a registry.
    pub fn qualified_key(&self) -> String {
        self.metadata.qualified_key()
    }

    /// Invoke the skill. Errors propagate to the caller unmodified.
    pub async fn execute(&self, args: &Value) -> Result<Value, AgentError> {
        self.handler
            .call(args)
            .await
            .map_err(|message| AgentError::Skill {
                name: self.metadata.name.clone(),
                message,
            })
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A named, already-in-memory collection of skills that can be registered
/// as a batch.
pub trait SkillModule {
    fn name(&self) -> &str;
    fn skills(&self) -> Vec<Skill>;
}

pub use loader::{load_dir, load_file, load_module, LoadReport, SkillBindings, SkillFilter};
pub use metadata::{Param, ParamSpec, ParamType, SkillBuilder, SkillMetadata};
pub use ops::{compare, difference, intersection, symmetric_difference, union, RegistryComparison};
pub use registry::{Lookup, MetadataPatch, SkillRegistry};
pub use schema::format_tool;
