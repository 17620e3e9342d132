//! Prompt template registry with embedded seed catalogue.
//!
//! The registry holds [`PromptTemplate`] entries keyed by id, plus a
//! per-category default used when an exact `(version, language)` match
//! is missing. It is constructed once at startup from the compiled-in
//! seed and handed to the server by injection — no global accessor.
//!
//! Mutation (`register`, `record_performance`, `reload`) takes
//! `&mut self`; the server wraps the registry in an `RwLock`, so unlike
//! the usual hot-reload hazard, readers never observe a partially
//! rebuilt registry.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Deserialize;

use super::template::{Language, PromptTemplate, TemplateCategory};
use crate::{MuninError, Result};

/// Deployment profile, selected by `MUNIN_ENV`.
///
/// The profile picks which template version resolves by default:
/// production stays on the stable `v1` generation, development prefers
/// the experimental `v2` entries where they exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Production,
    Development,
}

impl Profile {
    /// Version tag this profile resolves when the caller doesn't pin one.
    pub fn default_version(self) -> &'static str {
        match self {
            Self::Production => "v1",
            Self::Development => "v2",
        }
    }
}

impl FromStr for Profile {
    type Err = MuninError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(MuninError::Configuration(format!(
                "unknown profile '{other}' (expected 'production' or 'development')"
            ))),
        }
    }
}

/// Version/language constraints for a registry lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateQuery {
    pub version: Option<String>,
    pub language: Option<Language>,
}

impl TemplateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }
}

/// Conflict behaviour for [`PromptRegistry::register`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegisterMode {
    /// Last registration wins. This is what seed loading uses.
    #[default]
    Overwrite,
    /// Reject a duplicate id with [`MuninError::DuplicateTemplate`].
    Strict,
}

/// One seed entry: a template plus a flag marking it as its category's
/// default.
#[derive(Debug, Deserialize)]
struct SeedEntry {
    #[serde(flatten)]
    template: PromptTemplate,
    #[serde(default)]
    default: bool,
}

/// In-memory prompt template registry.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
    defaults: HashMap<TemplateCategory, String>,
    profile: Profile,
}

/// Raw JSON seed catalogue compiled into the binary.
const EMBEDDED_SEED: &str = include_str!("seed.json");

impl PromptRegistry {
    /// Create an empty registry for the given profile.
    pub fn new(profile: Profile) -> Self {
        Self {
            templates: HashMap::new(),
            defaults: HashMap::new(),
            profile,
        }
    }

    /// Create a registry pre-populated with the embedded seed catalogue.
    pub fn with_embedded_seed(profile: Profile) -> Self {
        let mut registry = Self::new(profile);
        registry.load_seed();
        registry
    }

    fn load_seed(&mut self) {
        let entries: Vec<SeedEntry> = match serde_json::from_str(EMBEDDED_SEED) {
            Ok(entries) => entries,
            Err(e) => {
                // The seed is compiled in and covered by tests; an empty
                // registry is still usable through explicit registration.
                tracing::error!("failed to parse embedded prompt seed: {e}");
                return;
            }
        };
        for entry in entries {
            let category = entry.template.category;
            let id = entry.template.id.clone();
            // Later seed entries replace earlier ones with the same id.
            let _ = self.register(entry.template, RegisterMode::Overwrite);
            if entry.default {
                self.defaults.insert(category, id);
            }
        }
    }

    /// Register a template under its id.
    ///
    /// `Overwrite` silently replaces an existing template with the same
    /// id (last registration wins); `Strict` rejects the duplicate.
    pub fn register(&mut self, template: PromptTemplate, mode: RegisterMode) -> Result<()> {
        if mode == RegisterMode::Strict && self.templates.contains_key(&template.id) {
            return Err(MuninError::DuplicateTemplate(template.id));
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Mark an already-registered template as its category's default.
    pub fn set_default(&mut self, id: &str) -> Result<()> {
        let template = self
            .templates
            .get(id)
            .ok_or_else(|| MuninError::TemplateIdNotFound(id.to_string()))?;
        self.defaults.insert(template.category, id.to_string());
        Ok(())
    }

    /// Resolve a template for a category.
    ///
    /// Tries the exact `(version, language)` combination first — the
    /// version defaulting to the profile's, the language to Japanese —
    /// and falls back to the category default when there is no exact
    /// match. Only when no default is registered either does the lookup
    /// fail.
    pub fn get(&self, category: TemplateCategory, query: &TemplateQuery) -> Result<&PromptTemplate> {
        let version = query
            .version
            .as_deref()
            .unwrap_or_else(|| self.profile.default_version());
        let language = query.language.unwrap_or_default();

        let mut matches: Vec<&PromptTemplate> = self
            .templates
            .values()
            .filter(|t| t.category == category && t.version == version && t.language == language)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(template) = matches.into_iter().next() {
            return Ok(template);
        }

        self.defaults
            .get(&category)
            .and_then(|id| self.templates.get(id))
            .ok_or_else(|| MuninError::TemplateNotFound {
                category: category.to_string(),
            })
    }

    /// Look up a template by id.
    pub fn get_by_id(&self, id: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| MuninError::TemplateIdNotFound(id.to_string()))
    }

    /// All templates in a category, sorted by id.
    pub fn list_by_category(&self, category: TemplateCategory) -> Vec<&PromptTemplate> {
        let mut list: Vec<&PromptTemplate> = self
            .templates
            .values()
            .filter(|t| t.category == category)
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// All templates with a version tag, sorted by id.
    pub fn list_by_version(&self, version: &str) -> Vec<&PromptTemplate> {
        let mut list: Vec<&PromptTemplate> = self
            .templates
            .values()
            .filter(|t| t.version == version)
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// All templates carrying a metadata tag, sorted by id.
    pub fn search_by_tag(&self, tag: &str) -> Vec<&PromptTemplate> {
        let mut list: Vec<&PromptTemplate> = self
            .templates
            .values()
            .filter(|t| t.metadata.tags.iter().any(|candidate| candidate.as_str() == tag))
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Fold a measurement observation into a template's performance
    /// stats — the only mutation a registered template admits.
    pub fn record_performance(&mut self, id: &str, success: bool) -> Result<()> {
        let template = self
            .templates
            .get_mut(id)
            .ok_or_else(|| MuninError::TemplateIdNotFound(id.to_string()))?;
        template
            .metadata
            .performance
            .get_or_insert_with(Default::default)
            .record(success);
        Ok(())
    }

    /// Clear everything and rebuild from the embedded seed.
    pub fn reload(&mut self) {
        self.templates.clear();
        self.defaults.clear();
        self.load_seed();
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
