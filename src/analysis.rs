//! Analysis payloads: parsing model output and repairing it to contract.
//!
//! The model is asked for JSON but routinely wraps it in markdown fences
//! or prose, under-fills arrays, or over-produces. [`extract_json`] digs
//! the JSON object out of the raw completion; [`RepairPolicy`] decides
//! what happens when the parsed object misses the contract: `Lenient`
//! pads, truncates, and clamps to schema-conformant shape, `Strict`
//! rejects. Truly unparseable output is always an error — the raw text
//! is logged server-side and never returned to the caller.

use serde::{Deserialize, Serialize};

use crate::{MuninError, Result};

/// Contractual shape limits for analysis payloads.
pub const MAX_TITLES: usize = 5;
pub const HASHTAG_COUNT: usize = 20;
pub const MAX_SUMMARY_CHARS: usize = 100;
pub const MAX_KEYWORDS: usize = 10;
pub const MAX_SUGGESTIONS: usize = 5;

/// Filler hashtags used when the model under-produces.
const DEFAULT_HASHTAGS: &[&str] = &[
    "#note", "#ブログ", "#コラム", "#エッセイ", "#読書", "#学び", "#日常", "#仕事",
    "#ライフスタイル", "#自己成長",
];

/// How to handle model output that misses the payload contract.
///
/// Wrong array lengths and missing fields are repairable; this policy
/// controls whether they are repaired or rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairPolicy {
    /// Pad, truncate, and clamp to a schema-conformant payload.
    ///
    /// This is the default — a best-effort response beats failing the
    /// whole request when the model slightly under/over-produces.
    #[default]
    Lenient,

    /// Any repair condition is a parsing error.
    ///
    /// For consumers that would rather fail than receive padded data.
    Strict,
}

/// Marketing analysis for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    /// Candidate titles, at most [`MAX_TITLES`].
    pub titles: Vec<String>,
    /// Exactly [`HASHTAG_COUNT`] hashtags, each `#`-prefixed.
    pub hashtags: Vec<String>,
    /// Prompt for generating an eye-catch image.
    pub eyecatch_prompt: String,
    /// Summary, at most [`MAX_SUMMARY_CHARS`] characters.
    pub summary: String,
    /// SEO score, 0–100.
    pub seo_score: u8,
    /// Virality score, 0–100.
    pub virality_score: u8,
}

/// Extended analysis returned by the full endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullArticleAnalysis {
    #[serde(flatten)]
    pub base: ArticleAnalysis,
    /// Extracted keywords, at most [`MAX_KEYWORDS`].
    pub keywords: Vec<String>,
    pub target_audience: String,
    /// Improvement suggestions, at most [`MAX_SUGGESTIONS`].
    pub improvement_suggestions: Vec<String>,
    pub tone: String,
}

/// Either analysis flavour, as cached and returned by the routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisPayload {
    Full(FullArticleAnalysis),
    Standard(ArticleAnalysis),
}

/// Loosely-typed mirror of the payload, as the model actually emits it.
///
/// Everything optional, scores as raw numbers; [`repair`] turns this
/// into the strict contract shape.
#[derive(Debug, Default, Deserialize)]
struct RawAnalysis {
    titles: Option<Vec<String>>,
    hashtags: Option<Vec<String>>,
    eyecatch_prompt: Option<String>,
    summary: Option<String>,
    seo_score: Option<f64>,
    virality_score: Option<f64>,
    keywords: Option<Vec<String>>,
    target_audience: Option<String>,
    improvement_suggestions: Option<Vec<String>>,
    tone: Option<String>,
}

impl RawAnalysis {
    /// True when the object carries none of the expected fields —
    /// i.e. it is valid JSON but not an analysis at all.
    fn is_vacant(&self) -> bool {
        self.titles.is_none()
            && self.hashtags.is_none()
            && self.eyecatch_prompt.is_none()
            && self.summary.is_none()
            && self.seo_score.is_none()
            && self.virality_score.is_none()
    }
}

/// Extract the JSON object from a raw model completion.
///
/// Strips markdown code fences and any prose before/after the outermost
/// `{...}`. Invalid JSON is a [`MuninError::Parsing`] error.
pub fn extract_json(raw: &str) -> Result<serde_json::Value> {
    let mut text = raw.trim();

    // Strip a ```json ... ``` fence if present.
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            text = rest[..end].trim();
        }
    }

    let start = text
        .find('{')
        .ok_or_else(|| MuninError::Parsing("no JSON object in model output".to_string()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| MuninError::Parsing("unterminated JSON object in model output".to_string()))?;
    if end < start {
        return Err(MuninError::Parsing(
            "malformed JSON object in model output".to_string(),
        ));
    }

    serde_json::from_str(&text[start..=end])
        .map_err(|e| MuninError::Parsing(format!("invalid JSON: {e}")))
}

/// Parse and repair a standard analysis from a raw completion.
pub fn parse_analysis(raw: &str, policy: RepairPolicy) -> Result<ArticleAnalysis> {
    let value = extract_json(raw)?;
    let parsed: RawAnalysis = serde_json::from_value(value)
        .map_err(|e| MuninError::Parsing(format!("unexpected shape: {e}")))?;
    if parsed.is_vacant() {
        return Err(MuninError::Parsing(
            "model output is missing the expected analysis fields".to_string(),
        ));
    }
    repair_standard(parsed, policy)
}

/// Parse and repair a full analysis from a raw completion.
pub fn parse_full_analysis(raw: &str, policy: RepairPolicy) -> Result<FullArticleAnalysis> {
    let value = extract_json(raw)?;
    let parsed: RawAnalysis = serde_json::from_value(value)
        .map_err(|e| MuninError::Parsing(format!("unexpected shape: {e}")))?;
    if parsed.is_vacant() {
        return Err(MuninError::Parsing(
            "model output is missing the expected analysis fields".to_string(),
        ));
    }

    let keywords = repair_list(
        parsed.keywords.clone(),
        MAX_KEYWORDS,
        false,
        "keywords",
        policy,
    )?;
    let improvement_suggestions = repair_list(
        parsed.improvement_suggestions.clone(),
        MAX_SUGGESTIONS,
        false,
        "improvement_suggestions",
        policy,
    )?;
    let target_audience =
        repair_string(parsed.target_audience.clone(), "target_audience", policy)?;
    let tone = repair_string(parsed.tone.clone(), "tone", policy)?;
    let base = repair_standard(parsed, policy)?;

    Ok(FullArticleAnalysis {
        base,
        keywords,
        target_audience,
        improvement_suggestions,
        tone,
    })
}

fn repair_standard(raw: RawAnalysis, policy: RepairPolicy) -> Result<ArticleAnalysis> {
    let titles = repair_list(raw.titles, MAX_TITLES, false, "titles", policy)?;
    let hashtags = repair_hashtags(raw.hashtags, policy)?;
    let eyecatch_prompt = repair_string(raw.eyecatch_prompt, "eyecatch_prompt", policy)?;
    let summary = repair_summary(raw.summary, policy)?;
    let seo_score = repair_score(raw.seo_score, "seo_score", policy)?;
    let virality_score = repair_score(raw.virality_score, "virality_score", policy)?;

    Ok(ArticleAnalysis {
        titles,
        hashtags,
        eyecatch_prompt,
        summary,
        seo_score,
        virality_score,
    })
}

/// Truncate a list to `max`; in strict mode a missing, empty, or
/// over-long list is an error. `exact` demands exactly `max` entries.
fn repair_list(
    list: Option<Vec<String>>,
    max: usize,
    exact: bool,
    field: &str,
    policy: RepairPolicy,
) -> Result<Vec<String>> {
    let mut list = match list {
        Some(list) => list,
        None if policy == RepairPolicy::Strict => {
            return Err(MuninError::Parsing(format!("missing field '{field}'")));
        }
        None => Vec::new(),
    };

    if policy == RepairPolicy::Strict {
        let ok = if exact {
            list.len() == max
        } else {
            !list.is_empty() && list.len() <= max
        };
        if !ok {
            return Err(MuninError::Parsing(format!(
                "field '{field}' has {} entries, contract allows {}{max}",
                list.len(),
                if exact { "exactly " } else { "1..=" },
            )));
        }
    }

    list.truncate(max);
    Ok(list)
}

/// Hashtags are exactly [`HASHTAG_COUNT`], each `#`-prefixed; lenient
/// mode pads from the default pool (deduplicated, numbered past the
/// pool's end).
fn repair_hashtags(tags: Option<Vec<String>>, policy: RepairPolicy) -> Result<Vec<String>> {
    let mut tags = repair_list(tags, HASHTAG_COUNT, true, "hashtags", policy)?;

    for tag in &mut tags {
        let trimmed = tag.trim();
        let fixed = if !trimmed.starts_with('#') {
            Some(format!("#{trimmed}"))
        } else if trimmed.len() != tag.len() {
            Some(trimmed.to_string())
        } else {
            None
        };
        if let Some(fixed) = fixed {
            *tag = fixed;
        }
    }

    let filler: Vec<String> = DEFAULT_HASHTAGS
        .iter()
        .map(|t| (*t).to_string())
        .filter(|t| !tags.contains(t))
        .collect();
    let mut filler = filler.into_iter();
    let mut counter = 1usize;
    while tags.len() < HASHTAG_COUNT {
        match filler.next() {
            Some(tag) => tags.push(tag),
            None => {
                tags.push(format!("#tag{counter}"));
                counter += 1;
            }
        }
    }

    Ok(tags)
}

fn repair_string(value: Option<String>, field: &str, policy: RepairPolicy) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None if policy == RepairPolicy::Strict => {
            Err(MuninError::Parsing(format!("missing field '{field}'")))
        }
        None => Ok(String::new()),
    }
}

/// Summaries are capped at [`MAX_SUMMARY_CHARS`] characters (not bytes —
/// the catalogue is mostly Japanese).
fn repair_summary(summary: Option<String>, policy: RepairPolicy) -> Result<String> {
    let summary = repair_string(summary, "summary", policy)?;
    if summary.chars().count() <= MAX_SUMMARY_CHARS {
        return Ok(summary);
    }
    if policy == RepairPolicy::Strict {
        return Err(MuninError::Parsing(format!(
            "summary exceeds {MAX_SUMMARY_CHARS} characters"
        )));
    }
    Ok(summary.chars().take(MAX_SUMMARY_CHARS).collect())
}

fn repair_score(score: Option<f64>, field: &str, policy: RepairPolicy) -> Result<u8> {
    let score = match score {
        Some(s) => s,
        None if policy == RepairPolicy::Strict => {
            return Err(MuninError::Parsing(format!("missing field '{field}'")));
        }
        None => 0.0,
    };
    if policy == RepairPolicy::Strict && !(0.0..=100.0).contains(&score) {
        return Err(MuninError::Parsing(format!(
            "field '{field}' out of range: {score}"
        )));
    }
    Ok(score.clamp(0.0, 100.0).round() as u8)
}
