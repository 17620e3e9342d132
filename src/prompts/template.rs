//! Prompt template types.
//!
//! A template is a versioned, language-tagged instruction pair (system
//! prompt + user prompt template) for one task category. Templates are
//! immutable once registered; the only mutable part is the performance
//! block in [`TemplateMetadata`], fed back from measurement.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MuninError, Result};

/// Task category a template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    /// Candidate article titles.
    Title,
    /// Hashtag generation.
    Hashtag,
    /// Eye-catch image prompt.
    Eyecatch,
    /// SEO / virality scoring.
    Seo,
    /// Combined marketing analysis (the analyze-article endpoint).
    Analysis,
    /// Extended analysis (the analyze-article-full endpoint).
    AnalysisFull,
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Title => "title",
            Self::Hashtag => "hashtag",
            Self::Eyecatch => "eyecatch",
            Self::Seo => "seo",
            Self::Analysis => "analysis",
            Self::AnalysisFull => "analysis_full",
        };
        f.write_str(s)
    }
}

impl FromStr for TemplateCategory {
    type Err = MuninError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "title" => Ok(Self::Title),
            "hashtag" => Ok(Self::Hashtag),
            "eyecatch" => Ok(Self::Eyecatch),
            "seo" => Ok(Self::Seo),
            "analysis" => Ok(Self::Analysis),
            "analysis_full" => Ok(Self::AnalysisFull),
            other => Err(MuninError::InvalidInput(format!(
                "unknown template category '{other}'"
            ))),
        }
    }
}

/// Template language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Japanese — the catalogue's primary audience.
    #[default]
    Ja,
    En,
}

/// Expected output format of a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

/// Provider-side caching directives for a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingDirective {
    /// Attach an ephemeral cache-control hint to the system prompt.
    ///
    /// Worth it for templates whose system prompt dominates the input:
    /// repeat calls bill the prompt at the cache-read tier.
    #[serde(default)]
    pub system_prompt: bool,
}

/// Aggregated measurement feedback for one template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Number of measured completions.
    pub samples: u64,
    /// Fraction of completions that parsed and passed repair, in [0, 1].
    pub success_rate: f64,
}

impl PerformanceStats {
    /// Fold one observation into the running stats.
    pub fn record(&mut self, success: bool) {
        let successes = self.success_rate * self.samples as f64 + f64::from(u8::from(success));
        self.samples += 1;
        self.success_rate = successes / self.samples as f64;
    }
}

/// Authorship and discovery metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceStats>,
}

/// A versioned prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Unique identity within the registry.
    pub id: String,
    pub category: TemplateCategory,
    /// Version tag, e.g. "v1".
    pub version: String,
    #[serde(default)]
    pub language: Language,
    pub system_prompt: String,
    /// User prompt with `{{variable}}` placeholders.
    pub user_prompt_template: String,
    /// Placeholder names the template expects.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<CachingDirective>,
    /// Output budget ceiling the template author considers sufficient.
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub metadata: TemplateMetadata,
}

impl PromptTemplate {
    /// Render the user prompt, substituting every declared variable.
    ///
    /// Every name in `variables` must be present in `vars`; a missing
    /// one is a configuration error (the template and its call site
    /// disagree), not a user error.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> Result<String> {
        let mut rendered = self.user_prompt_template.clone();
        for name in &self.variables {
            let value = vars.get(name.as_str()).ok_or_else(|| {
                MuninError::Configuration(format!(
                    "template '{}' expects variable '{name}'",
                    self.id
                ))
            })?;
            rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
        }
        Ok(rendered)
    }

    /// Whether the system prompt should carry a cache-control hint.
    pub fn wants_system_prompt_caching(&self) -> bool {
        self.caching.is_some_and(|c| c.system_prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> PromptTemplate {
        PromptTemplate {
            id: "hashtag_v1_ja".into(),
            category: TemplateCategory::Hashtag,
            version: "v1".into(),
            language: Language::Ja,
            system_prompt: "You generate hashtags.".into(),
            user_prompt_template: "Article:\n{{article_text}}".into(),
            variables: vec!["article_text".into()],
            output_format: Some(OutputFormat::Json),
            caching: Some(CachingDirective {
                system_prompt: true,
            }),
            max_tokens: 500,
            temperature: 0.7,
            metadata: TemplateMetadata {
                author: "marketing".into(),
                tags: vec!["hashtag".into(), "ja".into()],
                performance: None,
            },
        }
    }

    #[test]
    fn render_substitutes_variables() {
        let mut vars = HashMap::new();
        vars.insert("article_text", "本文です");
        let rendered = template().render(&vars).unwrap();
        assert_eq!(rendered, "Article:\n本文です");
    }

    #[test]
    fn render_missing_variable_is_configuration_error() {
        let vars = HashMap::new();
        assert!(matches!(
            template().render(&vars),
            Err(MuninError::Configuration(_))
        ));
    }

    #[test]
    fn category_round_trips_through_str() {
        for cat in [
            TemplateCategory::Title,
            TemplateCategory::Hashtag,
            TemplateCategory::Eyecatch,
            TemplateCategory::Seo,
            TemplateCategory::Analysis,
            TemplateCategory::AnalysisFull,
        ] {
            assert_eq!(cat.to_string().parse::<TemplateCategory>().unwrap(), cat);
        }
        assert!("nonsense".parse::<TemplateCategory>().is_err());
    }

    #[test]
    fn performance_stats_running_average() {
        let mut stats = PerformanceStats::default();
        stats.record(true);
        stats.record(true);
        stats.record(false);
        assert_eq!(stats.samples, 3);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn caching_directive_defaults_off() {
        let mut t = template();
        t.caching = None;
        assert!(!t.wants_system_prompt_caching());
        t.caching = Some(CachingDirective::default());
        assert!(!t.wants_system_prompt_caching());
    }

    #[test]
    fn template_deserializes_from_seed_shape() {
        let json = serde_json::json!({
            "id": "title_v1_ja",
            "category": "title",
            "version": "v1",
            "language": "ja",
            "system_prompt": "sys",
            "user_prompt_template": "user {{article_text}}",
            "variables": ["article_text"],
            "output_format": "json",
            "max_tokens": 1000,
            "temperature": 0.8,
            "metadata": {"author": "seed", "tags": ["title"]}
        });
        let t: PromptTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(t.category, TemplateCategory::Title);
        assert_eq!(t.language, Language::Ja);
        assert!(t.caching.is_none());
    }
}
