//! Prompt templates and their registry.

pub mod registry;
pub mod template;

pub use registry::{Profile, PromptRegistry, RegisterMode, TemplateQuery};
pub use template::{
    CachingDirective, Language, OutputFormat, PerformanceStats, PromptTemplate, TemplateCategory,
    TemplateMetadata,
};
