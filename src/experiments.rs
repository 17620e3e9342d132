//! A/B experiments over prompt templates.
//!
//! An experiment splits a category's traffic across prompt variants.
//! Assignment is a consistent hash of `(user, experiment)` reduced into
//! cumulative traffic buckets, so the same user sees the same variant
//! for the whole experiment — flip-flopping mid-experiment would
//! invalidate the measurement.
//!
//! The hash is a polynomial string hash (djb2): cheap, well-spread over
//! 100 buckets, and deterministic across processes. It is not
//! cryptographic and must not be used where an adversary choosing user
//! ids matters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::prompts::{PromptTemplate, TemplateCategory};
use crate::{MuninError, Result};

/// Tolerance when checking that traffic percentages sum to 100.
const TRAFFIC_SUM_EPSILON: f64 = 0.01;

/// One arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVariant {
    pub id: String,
    pub prompt: PromptTemplate,
    /// Share of traffic in percent, 0–100.
    pub traffic_percentage: f64,
    pub active: bool,
}

/// A traffic-split experiment over one template category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub category: TemplateCategory,
    pub variants: Vec<ExperimentVariant>,
    pub active: bool,
}

/// In-memory experiment store.
///
/// Reads take `&self`, mutation takes `&mut self`; the server wraps the
/// manager in an `RwLock` alongside the prompt registry.
#[derive(Debug, Clone, Default)]
pub struct ExperimentManager {
    experiments: HashMap<String, Experiment>,
}

impl ExperimentManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new experiment after validating it.
    ///
    /// Validation requires at least two variants, traffic percentages
    /// over *all* variants summing to 100 (± 0.01), and every variant
    /// prompt belonging to the experiment's category.
    pub fn create(&mut self, experiment: Experiment) -> Result<()> {
        if self.experiments.contains_key(&experiment.id) {
            return Err(MuninError::ExperimentValidation(format!(
                "experiment '{}' already exists",
                experiment.id
            )));
        }
        validate(&experiment)?;
        self.experiments.insert(experiment.id.clone(), experiment);
        Ok(())
    }

    /// Look up an experiment by id.
    pub fn get(&self, id: &str) -> Result<&Experiment> {
        self.experiments
            .get(id)
            .ok_or_else(|| MuninError::ExperimentUnavailable(id.to_string()))
    }

    /// The active experiment for a category, if any.
    ///
    /// With several active experiments on one category the
    /// lexicographically first id wins, so resolution is deterministic.
    pub fn active_for_category(&self, category: TemplateCategory) -> Option<&Experiment> {
        self.experiments
            .values()
            .filter(|e| e.active && e.category == category)
            .min_by(|a, b| a.id.cmp(&b.id))
    }

    /// Assign a user to a variant.
    ///
    /// Deterministic: hash(user_id + experiment_id) mod 100, mapped
    /// into cumulative buckets over the *active* variants in
    /// declaration order. Note the asymmetry with [`create`]'s
    /// validation, which sums over all variants: deactivating a variant
    /// shifts its share onto the last active one rather than
    /// re-normalising — re-balance with [`update_traffic`] if that
    /// matters for the measurement.
    ///
    /// [`create`]: Self::create
    pub fn select_variant(&self, experiment_id: &str, user_id: &str) -> Result<&ExperimentVariant> {
        let experiment = self.get(experiment_id)?;
        if !experiment.active {
            return Err(MuninError::ExperimentUnavailable(experiment_id.to_string()));
        }
        let active: Vec<&ExperimentVariant> =
            experiment.variants.iter().filter(|v| v.active).collect();
        if active.is_empty() {
            return Err(MuninError::ExperimentUnavailable(experiment_id.to_string()));
        }

        let bucket = traffic_bucket(user_id, experiment_id);
        let mut cumulative = 0.0;
        for variant in &active {
            cumulative += variant.traffic_percentage;
            if f64::from(bucket) < cumulative {
                return Ok(*variant);
            }
        }
        // Bucket past the cumulative total (possible when variants were
        // deactivated): the last active variant absorbs the remainder.
        Ok(active[active.len() - 1])
    }

    /// Replace traffic allocations and re-validate the sum.
    ///
    /// `allocations` maps variant id → new percentage; every id must
    /// exist and the result must still sum to 100 over all variants.
    pub fn update_traffic(&mut self, id: &str, allocations: &[(String, f64)]) -> Result<()> {
        let experiment = self
            .experiments
            .get_mut(id)
            .ok_or_else(|| MuninError::ExperimentUnavailable(id.to_string()))?;

        let mut updated = experiment.clone();
        for (variant_id, percentage) in allocations {
            let variant = updated
                .variants
                .iter_mut()
                .find(|v| &v.id == variant_id)
                .ok_or_else(|| {
                    MuninError::ExperimentValidation(format!(
                        "experiment '{id}' has no variant '{variant_id}'"
                    ))
                })?;
            variant.traffic_percentage = *percentage;
        }
        validate(&updated)?;
        *experiment = updated;
        Ok(())
    }

    /// Activate or deactivate a whole experiment.
    pub fn set_active(&mut self, id: &str, active: bool) -> Result<()> {
        let experiment = self
            .experiments
            .get_mut(id)
            .ok_or_else(|| MuninError::ExperimentUnavailable(id.to_string()))?;
        experiment.active = active;
        Ok(())
    }

    /// Activate or deactivate a single variant.
    pub fn set_variant_active(&mut self, id: &str, variant_id: &str, active: bool) -> Result<()> {
        let experiment = self
            .experiments
            .get_mut(id)
            .ok_or_else(|| MuninError::ExperimentUnavailable(id.to_string()))?;
        let variant = experiment
            .variants
            .iter_mut()
            .find(|v| v.id == variant_id)
            .ok_or_else(|| {
                MuninError::ExperimentValidation(format!(
                    "experiment '{id}' has no variant '{variant_id}'"
                ))
            })?;
        variant.active = active;
        Ok(())
    }

    /// Feed a measurement result back into a variant's prompt stats.
    pub fn record_result(&mut self, id: &str, variant_id: &str, success: bool) -> Result<()> {
        let experiment = self
            .experiments
            .get_mut(id)
            .ok_or_else(|| MuninError::ExperimentUnavailable(id.to_string()))?;
        let variant = experiment
            .variants
            .iter_mut()
            .find(|v| v.id == variant_id)
            .ok_or_else(|| {
                MuninError::ExperimentValidation(format!(
                    "experiment '{id}' has no variant '{variant_id}'"
                ))
            })?;
        variant
            .prompt
            .metadata
            .performance
            .get_or_insert_with(Default::default)
            .record(success);
        Ok(())
    }

    /// Number of registered experiments.
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Whether no experiments are registered.
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

fn validate(experiment: &Experiment) -> Result<()> {
    if experiment.variants.len() < 2 {
        return Err(MuninError::ExperimentValidation(format!(
            "experiment '{}' needs at least 2 variants, has {}",
            experiment.id,
            experiment.variants.len()
        )));
    }

    let sum: f64 = experiment
        .variants
        .iter()
        .map(|v| v.traffic_percentage)
        .sum();
    if (sum - 100.0).abs() > TRAFFIC_SUM_EPSILON {
        return Err(MuninError::ExperimentValidation(format!(
            "experiment '{}' traffic percentages sum to {sum}, expected 100",
            experiment.id
        )));
    }

    for variant in &experiment.variants {
        if variant.prompt.category != experiment.category {
            return Err(MuninError::ExperimentValidation(format!(
                "variant '{}' prompt category '{}' does not match experiment category '{}'",
                variant.id, variant.prompt.category, experiment.category
            )));
        }
        if !(0.0..=100.0).contains(&variant.traffic_percentage) {
            return Err(MuninError::ExperimentValidation(format!(
                "variant '{}' traffic percentage {} is out of range",
                variant.id, variant.traffic_percentage
            )));
        }
    }

    Ok(())
}

/// Map `(user, experiment)` onto a bucket in 0..100.
///
/// djb2 over the concatenation. Same inputs, same bucket, always.
fn traffic_bucket(user_id: &str, experiment_id: &str) -> u8 {
    let mut hash: u64 = 5381;
    for byte in user_id.bytes().chain(experiment_id.bytes()) {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
    }
    (hash % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{Language, TemplateMetadata};

    fn prompt(category: TemplateCategory, id: &str) -> PromptTemplate {
        PromptTemplate {
            id: id.into(),
            category,
            version: "v1".into(),
            language: Language::Ja,
            system_prompt: "sys".into(),
            user_prompt_template: "{{article_text}}".into(),
            variables: vec!["article_text".into()],
            output_format: None,
            caching: None,
            max_tokens: 500,
            temperature: 0.5,
            metadata: TemplateMetadata::default(),
        }
    }

    fn two_way_experiment(id: &str, split: (f64, f64)) -> Experiment {
        Experiment {
            id: id.into(),
            category: TemplateCategory::Title,
            active: true,
            variants: vec![
                ExperimentVariant {
                    id: "a".into(),
                    prompt: prompt(TemplateCategory::Title, "title_a"),
                    traffic_percentage: split.0,
                    active: true,
                },
                ExperimentVariant {
                    id: "b".into(),
                    prompt: prompt(TemplateCategory::Title, "title_b"),
                    traffic_percentage: split.1,
                    active: true,
                },
            ],
        }
    }

    #[test]
    fn create_validates_variant_count() {
        let mut manager = ExperimentManager::new();
        let mut experiment = two_way_experiment("exp", (50.0, 50.0));
        experiment.variants.truncate(1);
        experiment.variants[0].traffic_percentage = 100.0;
        assert!(matches!(
            manager.create(experiment),
            Err(MuninError::ExperimentValidation(_))
        ));
    }

    #[test]
    fn create_validates_traffic_sum() {
        let mut manager = ExperimentManager::new();
        assert!(matches!(
            manager.create(two_way_experiment("exp", (50.0, 40.0))),
            Err(MuninError::ExperimentValidation(_))
        ));
        // Within epsilon passes.
        assert!(manager.create(two_way_experiment("exp", (50.004, 50.0))).is_ok());
    }

    #[test]
    fn create_validates_category_match() {
        let mut manager = ExperimentManager::new();
        let mut experiment = two_way_experiment("exp", (50.0, 50.0));
        experiment.variants[1].prompt = prompt(TemplateCategory::Hashtag, "hash");
        assert!(matches!(
            manager.create(experiment),
            Err(MuninError::ExperimentValidation(_))
        ));
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();
        assert!(matches!(
            manager.create(two_way_experiment("exp", (50.0, 50.0))),
            Err(MuninError::ExperimentValidation(_))
        ));
    }

    #[test]
    fn selection_is_deterministic_per_user() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();

        for user in ["alice", "bob", "carol", "10.0.0.1"] {
            let first = manager.select_variant("exp", user).unwrap().id.clone();
            for _ in 0..10 {
                assert_eq!(manager.select_variant("exp", user).unwrap().id, first);
            }
        }
    }

    #[test]
    fn traffic_split_converges() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();

        let mut counts = (0u32, 0u32);
        for i in 0..100_000 {
            let variant = manager.select_variant("exp", &format!("user-{i}")).unwrap();
            if variant.id == "a" {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
        }
        let share_a = f64::from(counts.0) / 100_000.0;
        assert!(
            (share_a - 0.5).abs() < 0.03,
            "variant a got {share_a} of traffic"
        );
    }

    #[test]
    fn skewed_split_respects_percentages() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (90.0, 10.0))).unwrap();

        let mut a = 0u32;
        for i in 0..100_000 {
            if manager.select_variant("exp", &format!("user-{i}")).unwrap().id == "a" {
                a += 1;
            }
        }
        let share = f64::from(a) / 100_000.0;
        assert!((share - 0.9).abs() < 0.03, "variant a got {share}");
    }

    #[test]
    fn inactive_experiment_is_unavailable() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();
        manager.set_active("exp", false).unwrap();
        assert!(matches!(
            manager.select_variant("exp", "alice"),
            Err(MuninError::ExperimentUnavailable(_))
        ));
    }

    #[test]
    fn all_variants_inactive_is_unavailable() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();
        manager.set_variant_active("exp", "a", false).unwrap();
        manager.set_variant_active("exp", "b", false).unwrap();
        assert!(matches!(
            manager.select_variant("exp", "alice"),
            Err(MuninError::ExperimentUnavailable(_))
        ));
    }

    #[test]
    fn deactivated_variant_stops_receiving_traffic() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();
        manager.set_variant_active("exp", "a", false).unwrap();

        for i in 0..1000 {
            let variant = manager.select_variant("exp", &format!("user-{i}")).unwrap();
            assert_eq!(variant.id, "b");
        }
    }

    #[test]
    fn update_traffic_revalidates() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();

        assert!(matches!(
            manager.update_traffic("exp", &[("a".into(), 80.0)]),
            Err(MuninError::ExperimentValidation(_))
        ));
        // Failed update leaves the experiment untouched.
        let experiment = manager.get("exp").unwrap();
        assert!((experiment.variants[0].traffic_percentage - 50.0).abs() < f64::EPSILON);

        manager
            .update_traffic("exp", &[("a".into(), 80.0), ("b".into(), 20.0)])
            .unwrap();
        let experiment = manager.get("exp").unwrap();
        assert!((experiment.variants[0].traffic_percentage - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn active_for_category_picks_lowest_id() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp-b", (50.0, 50.0))).unwrap();
        manager.create(two_way_experiment("exp-a", (50.0, 50.0))).unwrap();
        assert_eq!(
            manager
                .active_for_category(TemplateCategory::Title)
                .unwrap()
                .id,
            "exp-a"
        );
        assert!(
            manager
                .active_for_category(TemplateCategory::Hashtag)
                .is_none()
        );
    }

    #[test]
    fn record_result_updates_variant_prompt_stats() {
        let mut manager = ExperimentManager::new();
        manager.create(two_way_experiment("exp", (50.0, 50.0))).unwrap();
        manager.record_result("exp", "a", true).unwrap();
        manager.record_result("exp", "a", true).unwrap();

        let experiment = manager.get("exp").unwrap();
        let stats = experiment.variants[0].prompt.metadata.performance.unwrap();
        assert_eq!(stats.samples, 2);
        assert!((stats.success_rate - 1.0).abs() < 1e-12);
    }
}
