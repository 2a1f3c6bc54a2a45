//! Conflict detection and the archetype registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::logger::{Importance, SaveLogger};
use crate::models::{BatchPayload, PersistenceInstruction, UpdateCategory};

use super::{BatchConflict, ConflictArchetype, ConflictResolution, SpecialResolver};

/// Tag of the built-in resolver that sums numeric instruction bodies
pub const ADDITIVE_ARCHETYPE: &str = "additive";

const SENDER: &str = "conflict-resolver";

/// Detects overlapping batches and dispatches resolution by archetype.
///
/// Categories map to archetype tags; tags map to resolver functions. Both
/// maps are filled at startup, so resolution never looks anything up by
/// ad-hoc string matching.
pub struct BatchConflictResolver {
    category_archetypes: HashMap<UpdateCategory, String>,
    special_resolvers: HashMap<String, SpecialResolver>,
    logger: SaveLogger,
}

impl BatchConflictResolver {
    /// Resolver with the built-in `additive` archetype registered and no
    /// categories classified (every conflict supersedes).
    pub fn new(logger: SaveLogger) -> Self {
        let mut resolver = Self {
            category_archetypes: HashMap::new(),
            special_resolvers: HashMap::new(),
            logger,
        };
        resolver.register_special_resolver(ADDITIVE_ARCHETYPE, additive_counter_resolver);
        resolver
    }

    pub fn from_config(config: &SyncConfig, logger: SaveLogger) -> Self {
        let mut resolver = Self::new(logger);
        for category in &config.additive_categories {
            resolver.classify_category(category.clone(), ADDITIVE_ARCHETYPE);
        }
        resolver
    }

    pub fn register_special_resolver<F>(&mut self, tag: impl Into<String>, resolver: F)
    where
        F: Fn(&[PersistenceInstruction], &[PersistenceInstruction]) -> Result<Vec<PersistenceInstruction>>
            + Send
            + Sync
            + 'static,
    {
        self.special_resolvers.insert(tag.into(), Arc::new(resolver));
    }

    /// Route conflicts on `category` to the archetype `tag`.
    pub fn classify_category(&mut self, category: UpdateCategory, tag: impl Into<String>) {
        self.category_archetypes.insert(category, tag.into());
    }

    pub fn archetype_for(&self, category: &UpdateCategory) -> ConflictArchetype {
        self.category_archetypes
            .get(category)
            .map_or(ConflictArchetype::Supersede, |tag| {
                ConflictArchetype::Special(tag.clone())
            })
    }

    /// Conflicts between two unconfirmed payloads: one per shared category.
    ///
    /// Payloads are ordered by sequence before comparison. Categories whose
    /// archetype has no registered resolver are logged as unresolved and
    /// skipped, leaving both batches untouched.
    pub fn detect(&self, first: &BatchPayload, second: &BatchPayload) -> Vec<BatchConflict> {
        if first.player_id != second.player_id || first.session_batch_id == second.session_batch_id
        {
            return Vec::new();
        }
        let (older, younger) = if first.sequence < second.sequence {
            (first, second)
        } else {
            (second, first)
        };

        let younger_categories = younger.categories();
        older
            .categories()
            .into_iter()
            .filter(|category| younger_categories.contains(category))
            .filter_map(|category| {
                let archetype = self.archetype_for(category);
                let special = match &archetype {
                    ConflictArchetype::Supersede => None,
                    ConflictArchetype::Special(tag) => {
                        let Some(resolver) = self.special_resolvers.get(tag) else {
                            self.logger.log_unresolved_conflict(
                                SENDER,
                                Importance::Critical,
                                format!(
                                    "no resolver registered for archetype '{tag}' (category '{category}', batches {} / {})",
                                    older.session_batch_id, younger.session_batch_id
                                ),
                            );
                            return None;
                        };
                        Some(Arc::clone(resolver))
                    }
                };
                match BatchConflict::between(older, younger, category.clone(), archetype, special) {
                    Ok(conflict) => Some(conflict),
                    Err(error) => {
                        self.logger.log_unresolved_conflict(
                            SENDER,
                            Importance::High,
                            error.to_string(),
                        );
                        None
                    }
                }
            })
            .collect()
    }

    pub fn resolve(
        &self,
        conflict: &BatchConflict,
        older: &BatchPayload,
        younger: &BatchPayload,
    ) -> Result<ConflictResolution> {
        let resolution = conflict.resolve(older, younger);
        if let Err(error) = &resolution {
            self.logger.log_unresolved_conflict(
                SENDER,
                Importance::Critical,
                format!(
                    "conflict on '{}' between {} and {} left unresolved: {error}",
                    conflict.category, conflict.older, conflict.younger
                ),
            );
        }
        resolution
    }
}

/// Sum numeric bodies of older then younger instructions into one instruction.
///
/// Bodies must all be numbers, or all be objects whose values are numbers
/// (summed per key). Anything else is rejected so the conflict stays
/// unresolved rather than being merged wrongly.
pub fn additive_counter_resolver(
    older: &[PersistenceInstruction],
    younger: &[PersistenceInstruction],
) -> Result<Vec<PersistenceInstruction>> {
    let Some(first) = older.first().or_else(|| younger.first()) else {
        return Ok(Vec::new());
    };
    let category = first.category.clone();

    let mut total: Option<Value> = None;
    for instruction in older.iter().chain(younger) {
        total = Some(match total {
            None => validate_additive_body(&instruction.body)?,
            Some(acc) => add_bodies(&acc, &instruction.body)?,
        });
    }

    Ok(total
        .map(|body| vec![PersistenceInstruction { category, body }])
        .unwrap_or_default())
}

fn validate_additive_body(body: &Value) -> Result<Value> {
    match body {
        Value::Number(_) => Ok(body.clone()),
        Value::Object(fields) if fields.values().all(Value::is_number) => Ok(body.clone()),
        _ => Err(non_additive(body)),
    }
}

fn add_bodies(acc: &Value, next: &Value) -> Result<Value> {
    match (acc, next) {
        (Value::Number(_), Value::Number(_)) => add_numbers(acc, next).ok_or_else(|| non_additive(next)),
        (Value::Object(left), Value::Object(right)) => {
            let mut merged: Map<String, Value> = left.clone();
            for (key, value) in right {
                let summed = match merged.get(key) {
                    Some(existing) => add_numbers(existing, value),
                    None => value.is_number().then(|| value.clone()),
                }
                .ok_or_else(|| non_additive(next))?;
                merged.insert(key.clone(), summed);
            }
            Ok(Value::Object(merged))
        }
        _ => Err(non_additive(next)),
    }
}

fn add_numbers(left: &Value, right: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Some(Value::from(sum));
        }
    }
    let sum = left.as_f64()? + right.as_f64()?;
    sum.is_finite().then(|| Value::from(sum))
}

fn non_additive(body: &Value) -> Error {
    Error::InvalidInput(format!("body is not additive: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::SaveLogKind;
    use crate::models::{PlayerId, SaveBatch, WeightClass};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(player: &str, sequence: u64, instructions: &[(&str, Value)]) -> BatchPayload {
        let mut batch = SaveBatch::new(PlayerId::new(player), sequence, WeightClass::Slim, 0);
        for (category, body) in instructions {
            batch
                .add_instruction(PersistenceInstruction::new(*category, body.clone()))
                .unwrap();
        }
        batch.finalize(i64::try_from(sequence).unwrap())
    }

    #[test]
    fn detects_one_conflict_per_shared_category() {
        let resolver = BatchConflictResolver::new(SaveLogger::default());
        let older = payload("p1", 1, &[("coins", json!(1)), ("xp", json!(2))]);
        let younger = payload("p1", 2, &[("coins", json!(3)), ("inventory", json!(["sword"]))]);

        let conflicts = resolver.detect(&younger, &older);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].category, UpdateCategory::new("coins"));
        assert_eq!(conflicts[0].older, older.session_batch_id);
        assert_eq!(conflicts[0].younger, younger.session_batch_id);
        assert!(!conflicts[0].utilizes_special_batch_marker());
    }

    #[test]
    fn no_conflict_across_players_or_disjoint_categories() {
        let resolver = BatchConflictResolver::new(SaveLogger::default());
        let a = payload("p1", 1, &[("coins", json!(1))]);
        let b = payload("p2", 2, &[("coins", json!(1))]);
        let c = payload("p1", 3, &[("xp", json!(1))]);
        assert!(resolver.detect(&a, &b).is_empty());
        assert!(resolver.detect(&a, &c).is_empty());
    }

    #[test]
    fn normal_policy_drops_older_instructions() {
        let resolver = BatchConflictResolver::new(SaveLogger::default());
        let older = payload("p1", 1, &[("inventory", json!({"slot": "axe"}))]);
        let younger = payload("p1", 2, &[("inventory", json!({"slot": "sword"}))]);
        let conflict = resolver.detect(&older, &younger).remove(0);

        let resolution = resolver.resolve(&conflict, &older, &younger).unwrap();
        assert_eq!(resolution.archetype, ConflictArchetype::Supersede);
        assert!(resolution.older_instructions.is_empty());
        assert_eq!(
            resolution.younger_instructions,
            vec![PersistenceInstruction::new("inventory", json!({"slot": "sword"}))]
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let mut resolver = BatchConflictResolver::new(SaveLogger::default());
        resolver.classify_category(UpdateCategory::new("coins"), ADDITIVE_ARCHETYPE);
        let older = payload("p1", 1, &[("coins", json!(4))]);
        let younger = payload("p1", 2, &[("coins", json!(6))]);
        let conflict = resolver.detect(&older, &younger).remove(0);

        let first = resolver.resolve(&conflict, &older, &younger).unwrap();
        let second = resolver.resolve(&conflict, &older, &younger).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn additive_archetype_sums_counters() {
        let mut resolver = BatchConflictResolver::new(SaveLogger::default());
        resolver.classify_category(UpdateCategory::new("coins"), ADDITIVE_ARCHETYPE);
        let older = payload("p1", 1, &[("coins", json!(3)), ("coins", json!(2))]);
        let younger = payload("p1", 2, &[("coins", json!(5))]);
        let conflict = resolver.detect(&older, &younger).remove(0);
        assert!(conflict.utilizes_special_batch_marker());

        let resolution = resolver.resolve(&conflict, &older, &younger).unwrap();
        assert_eq!(
            resolution.younger_instructions,
            vec![PersistenceInstruction::new("coins", json!(10))]
        );
        assert!(resolution.older_instructions.is_empty());
    }

    #[test]
    fn additive_resolver_sums_object_fields() {
        let merged = additive_counter_resolver(
            &[PersistenceInstruction::new("stats", json!({"kills": 2, "deaths": 1}))],
            &[PersistenceInstruction::new("stats", json!({"kills": 3, "time": 1.5}))],
        )
        .unwrap();
        assert_eq!(
            merged,
            vec![PersistenceInstruction::new(
                "stats",
                json!({"deaths": 1, "kills": 5, "time": 1.5})
            )]
        );
    }

    #[test]
    fn additive_resolver_rejects_non_numeric_bodies() {
        let mut resolver = BatchConflictResolver::new(SaveLogger::default());
        resolver.classify_category(UpdateCategory::new("coins"), ADDITIVE_ARCHETYPE);
        let older = payload("p1", 1, &[("coins", json!("lots"))]);
        let younger = payload("p1", 2, &[("coins", json!(5))]);
        let conflict = resolver.detect(&older, &younger).remove(0);

        assert!(resolver.resolve(&conflict, &older, &younger).is_err());
        assert!(additive_counter_resolver(
            &[PersistenceInstruction::new("coins", json!(1))],
            &[PersistenceInstruction::new("coins", json!({"a": 1}))],
        )
        .is_err());
    }

    #[test]
    fn unregistered_archetype_is_logged_and_skipped() {
        let logger = SaveLogger::default();
        let mut resolver = BatchConflictResolver::new(logger.clone());
        resolver.classify_category(UpdateCategory::new("quests"), "quest-merge");
        let older = payload("p1", 1, &[("quests", json!(1))]);
        let younger = payload("p1", 2, &[("quests", json!(2))]);

        assert!(resolver.detect(&older, &younger).is_empty());
        let logged = logger.entries_of(SaveLogKind::UnresolvedConflict);
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].importance, Importance::Critical);
    }

    #[test]
    fn special_archetype_requires_resolver() {
        let older = payload("p1", 1, &[("coins", json!(1))]);
        let younger = payload("p1", 2, &[("coins", json!(2))]);
        let err = BatchConflict::between(
            &older,
            &younger,
            UpdateCategory::new("coins"),
            ConflictArchetype::Special("custom".to_string()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let reversed = BatchConflict::between(
            &younger,
            &older,
            UpdateCategory::new("coins"),
            ConflictArchetype::Supersede,
            None,
        );
        assert!(reversed.is_err());
    }

    #[test]
    fn custom_resolvers_can_be_registered() {
        let mut resolver = BatchConflictResolver::new(SaveLogger::default());
        resolver.register_special_resolver("keep-older", |older, _younger| Ok(older.to_vec()));
        resolver.classify_category(UpdateCategory::new("name"), "keep-older");
        let older = payload("p1", 1, &[("name", json!("first"))]);
        let younger = payload("p1", 2, &[("name", json!("second"))]);
        let conflict = resolver.detect(&older, &younger).remove(0);

        let resolution = resolver.resolve(&conflict, &older, &younger).unwrap();
        assert_eq!(
            resolution.younger_instructions,
            vec![PersistenceInstruction::new("name", json!("first"))]
        );
        assert_eq!(resolution.archetype.tag(), "keep-older");
    }
}
