//! Entity resolution: merge profile records that share an exact identifier.
//!
//! Records are linked through a union-find over normalized identifiers, so
//! resolution is linear in the number of identifiers. Names and emails never
//! cause a merge; distinct entities that share one are reported as
//! [`CandidateMatch`]es for the caller to confirm.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use proofly_core::{AttributeValue, CanonicalEntity, ProfileRecord};

use crate::normalize::{self, Identifier, IdentifierKind};
use crate::union_find::UnionFind;

/// Why two entities were surfaced as a possible match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    SharedEmail,
    SharedName,
}

/// Two distinct entities that may be the same person.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMatch {
    pub a: String,
    pub b: String,
    pub reason: MatchReason,
}

/// Output of one resolver run.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    entities: Vec<CanonicalEntity>,
    canonical_kinds: Vec<IdentifierKind>,
    /// Identifier key -> entity index
    alias_index: HashMap<String, usize>,
    /// Input record index -> entity index
    record_entities: Vec<Option<usize>>,
    candidate_matches: Vec<CandidateMatch>,
    unresolved: usize,
}

impl Resolution {
    /// Entities in order of the first record that produced them.
    pub fn entities(&self) -> &[CanonicalEntity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<CanonicalEntity> {
        self.entities
    }

    /// Entity the `index`-th input record was resolved into.
    pub fn entity_for_record(&self, index: usize) -> Option<&CanonicalEntity> {
        self.record_entities
            .get(index)
            .copied()
            .flatten()
            .map(|i| &self.entities[i])
    }

    /// Look up the entity for a raw identifier (username, numeric id or URL).
    pub fn lookup(&self, raw: &str) -> Option<&CanonicalEntity> {
        normalize::username(raw)
            .iter()
            .find_map(|id| self.alias_index.get(&id.key()))
            .map(|&i| &self.entities[i])
    }

    /// Normalized alias -> canonical id for every known identifier.
    pub fn mapping(&self) -> BTreeMap<String, String> {
        self.entities
            .iter()
            .flat_map(|e| {
                e.alias_ids
                    .iter()
                    .map(move |alias| (alias.clone(), e.canonical_id.clone()))
            })
            .collect()
    }

    /// Whether the entity's canonical id is accepted by relationship checks.
    pub fn is_facebook_style(&self, index: usize) -> bool {
        matches!(
            self.canonical_kinds.get(index),
            Some(IdentifierKind::Numeric | IdentifierKind::Username)
        )
    }

    pub fn candidate_matches(&self) -> &[CandidateMatch] {
        &self.candidate_matches
    }

    /// Records that carried no usable identifier.
    pub fn unresolved(&self) -> usize {
        self.unresolved
    }
}

/// Stateless resolver; every call is an independent run.
#[derive(Debug, Clone, Default)]
pub struct EntityResolver;

impl EntityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve records into canonical entities.
    ///
    /// Deterministic: the same input sequence always yields the same
    /// entities, canonical ids and attribute values.
    pub fn resolve(&self, records: &[ProfileRecord]) -> Resolution {
        let mut forest = UnionFind::default();
        let mut interned: HashMap<String, usize> = HashMap::new();
        let mut identifiers: Vec<Identifier> = Vec::new();
        let mut record_roots: Vec<Option<usize>> = Vec::with_capacity(records.len());
        let mut unresolved = 0;

        for record in records {
            let ids = normalize::record_identifiers(record);
            if ids.is_empty() {
                unresolved += 1;
                record_roots.push(None);
                continue;
            }

            let elements: Vec<usize> = ids
                .into_iter()
                .map(|id| {
                    *interned.entry(id.key()).or_insert_with(|| {
                        identifiers.push(id);
                        forest.push()
                    })
                })
                .collect();
            for &other in &elements[1..] {
                forest.union(elements[0], other);
            }
            record_roots.push(Some(elements[0]));
        }

        // Every set holds the identifiers of at least one record, so each
        // set is one entity. Entities are numbered in first-seen record order.
        let entity_count = forest.set_count();
        let mut root_to_entity: HashMap<usize, usize> = HashMap::with_capacity(entity_count);
        let mut record_entities = Vec::with_capacity(records.len());
        for root in record_roots {
            let entity = root.map(|element| {
                let root = forest.find(element);
                let next = root_to_entity.len();
                *root_to_entity.entry(root).or_insert(next)
            });
            record_entities.push(entity);
        }

        let mut members: Vec<Vec<&Identifier>> = vec![Vec::new(); entity_count];
        let mut alias_index = HashMap::with_capacity(identifiers.len());
        for (element, id) in identifiers.iter().enumerate() {
            let entity = root_to_entity[&forest.find(element)];
            members[entity].push(id);
            alias_index.insert(id.key(), entity);
        }

        let mut entities = Vec::with_capacity(members.len());
        let mut canonical_kinds = Vec::with_capacity(members.len());
        for aliases in &members {
            let (entity, kind) = canonical_entity(aliases);
            canonical_kinds.push(kind);
            entities.push(entity);
        }

        for (record, entity) in records.iter().zip(&record_entities) {
            if let Some(index) = entity {
                merge_attributes(&mut entities[*index], record);
            }
        }

        let candidate_matches = candidate_matches(records, &record_entities, &entities);

        debug!(
            records = records.len(),
            entities = entities.len(),
            unresolved,
            candidates = candidate_matches.len(),
            "Resolved profile records"
        );

        Resolution {
            entities,
            canonical_kinds,
            alias_index,
            record_entities,
            candidate_matches,
            unresolved,
        }
    }
}

/// Build an entity from its aliases (first-seen order).
///
/// Canonical id priority: numeric id, then username, then URL. More than one
/// numeric id marks the entity ambiguous; the first-seen one is kept.
fn canonical_entity(aliases: &[&Identifier]) -> (CanonicalEntity, IdentifierKind) {
    let numeric: Vec<&str> = aliases
        .iter()
        .filter(|id| id.kind() == IdentifierKind::Numeric)
        .map(|id| id.value())
        .collect();

    let canonical = aliases
        .iter()
        .min_by_key(|id| id.kind())
        .copied();

    let (canonical_id, kind) = match canonical {
        Some(id) => (id.value().to_string(), id.kind()),
        // Every entity is created from at least one identifier.
        None => (String::new(), IdentifierKind::Url),
    };

    let ambiguous = numeric.len() > 1;
    if ambiguous {
        warn!(
            canonical_id = %canonical_id,
            conflicting = ?numeric,
            "Merged records carry conflicting numeric ids"
        );
    }

    let entity = CanonicalEntity {
        canonical_id,
        alias_ids: aliases.iter().map(|id| id.value().to_string()).collect(),
        attributes: BTreeMap::new(),
        ambiguous,
        conflicting_ids: if ambiguous {
            numeric.iter().map(|s| s.to_string()).collect()
        } else {
            Vec::new()
        },
    };
    (entity, kind)
}

/// Higher confidence wins; on a tie the first-seen value stays.
fn merge_attributes(entity: &mut CanonicalEntity, record: &ProfileRecord) {
    let confidence = record.confidence.unwrap_or(0.0);
    let named = [
        ("name", record.name.as_deref()),
        ("email", record.email.as_deref()),
        ("location", record.location.as_deref()),
    ];
    let values = named
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .chain(record.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    for (name, value) in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match entity.attributes.get_mut(name) {
            Some(existing) if existing.confidence >= confidence => {}
            Some(existing) => {
                existing.value = value.to_string();
                existing.confidence = confidence;
            }
            None => {
                entity.attributes.insert(
                    name.to_string(),
                    AttributeValue {
                        value: value.to_string(),
                        confidence,
                    },
                );
            }
        }
    }
}

fn candidate_matches(
    records: &[ProfileRecord],
    record_entities: &[Option<usize>],
    entities: &[CanonicalEntity],
) -> Vec<CandidateMatch> {
    let mut by_key: BTreeMap<(MatchReason, String), BTreeSet<usize>> = BTreeMap::new();
    for (record, entity) in records.iter().zip(record_entities) {
        let Some(entity) = *entity else { continue };
        if let Some(email) = record.email.as_deref().and_then(normalize::email) {
            by_key
                .entry((MatchReason::SharedEmail, email))
                .or_default()
                .insert(entity);
        }
        if let Some(name) = record.name.as_deref().and_then(normalize::full_name) {
            by_key
                .entry((MatchReason::SharedName, name))
                .or_default()
                .insert(entity);
        }
    }

    let mut pairs: BTreeSet<(usize, usize, MatchReason)> = BTreeSet::new();
    for ((reason, _), group) in &by_key {
        let group: Vec<usize> = group.iter().copied().collect();
        for (i, &a) in group.iter().enumerate() {
            for &b in &group[i + 1..] {
                pairs.insert((a, b, *reason));
            }
        }
    }

    pairs
        .into_iter()
        .map(|(a, b, reason)| CandidateMatch {
            a: entities[a].canonical_id.clone(),
            b: entities[b].canonical_id.clone(),
            reason,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: Option<&str>, numeric: Option<&str>, url: Option<&str>) -> ProfileRecord {
        ProfileRecord {
            username: username.map(String::from),
            numeric_id: numeric.map(String::from),
            profile_url: url.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_identifier_merges() {
        let records = vec![
            record(Some("john.smith"), None, None),
            record(None, Some("100004"), Some("https://facebook.com/John.Smith")),
        ];
        let resolution = EntityResolver::new().resolve(&records);

        assert_eq!(resolution.entities().len(), 1);
        let entity = &resolution.entities()[0];
        assert_eq!(entity.canonical_id, "100004");
        assert!(entity.alias_ids.contains("john.smith"));
        assert!(entity.alias_ids.contains("100004"));
        assert!(!entity.ambiguous);
        assert_eq!(
            resolution.entity_for_record(0).map(|e| &e.canonical_id),
            resolution.entity_for_record(1).map(|e| &e.canonical_id)
        );
    }

    #[test]
    fn test_transitive_merge() {
        let records = vec![
            record(Some("a.user"), None, None),
            record(None, None, Some("https://example.com/a")),
            record(Some("a.user"), None, Some("https://example.com/a")),
        ];
        let resolution = EntityResolver::new().resolve(&records);
        assert_eq!(resolution.entities().len(), 1);
        assert_eq!(resolution.entities()[0].canonical_id, "a.user");
    }

    #[test]
    fn test_url_only_canonical() {
        let records = vec![record(None, None, Some("https://example.com/someone"))];
        let resolution = EntityResolver::new().resolve(&records);
        assert_eq!(resolution.entities()[0].canonical_id, "example.com/someone");
        assert!(!resolution.is_facebook_style(0));
    }

    #[test]
    fn test_urls_differing_only_in_query_stay_apart() {
        let alice = ProfileRecord {
            name: Some("Alice".into()),
            ..record(None, None, Some("https://linkedin.com/profile/view?id=111"))
        };
        let bob = ProfileRecord {
            name: Some("Bob".into()),
            ..record(None, None, Some("https://linkedin.com/profile/view?id=222"))
        };
        let same_alice = record(None, None, Some("https://www.linkedin.com/profile/view?id=111&trk=x"));

        let resolution = EntityResolver::new().resolve(&[alice, bob, same_alice]);
        let ids: Vec<&str> = resolution
            .entities()
            .iter()
            .map(|e| e.canonical_id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec!["linkedin.com/profile/view?id=111", "linkedin.com/profile/view?id=222"]
        );
        assert_eq!(resolution.entity_for_record(2).unwrap().canonical_id, ids[0]);
    }

    #[test]
    fn test_url_and_username_with_same_text_get_distinct_ids() {
        let records = vec![
            record(None, None, Some("https://example.com")),
            record(Some("example.com"), None, None),
        ];
        let resolution = EntityResolver::new().resolve(&records);
        let ids: Vec<&str> = resolution
            .entities()
            .iter()
            .map(|e| e.canonical_id.as_str())
            .collect();
        assert_eq!(ids, vec!["example.com/", "example.com"]);
    }

    #[test]
    fn test_conflicting_numeric_ids_flag_ambiguous() {
        let records = vec![
            record(Some("jane.doe"), Some("111"), None),
            record(Some("jane.doe"), Some("222"), None),
        ];
        let resolution = EntityResolver::new().resolve(&records);
        let entity = &resolution.entities()[0];
        assert!(entity.ambiguous);
        assert_eq!(entity.canonical_id, "111");
        assert_eq!(entity.conflicting_ids, vec!["111", "222"]);
    }

    #[test]
    fn test_name_and_email_never_merge() {
        let mut a = record(Some("john.smith"), None, None);
        a.name = Some("John Smith".into());
        a.email = Some("john@example.com".into());
        let mut b = record(Some("jsmith.nyc"), None, None);
        b.name = Some("john  SMITH".into());
        b.email = Some("John@Example.com".into());

        let resolution = EntityResolver::new().resolve(&[a, b]);
        assert_eq!(resolution.entities().len(), 2);
        assert_eq!(
            resolution.candidate_matches(),
            &[
                CandidateMatch {
                    a: "john.smith".into(),
                    b: "jsmith.nyc".into(),
                    reason: MatchReason::SharedEmail
                },
                CandidateMatch {
                    a: "john.smith".into(),
                    b: "jsmith.nyc".into(),
                    reason: MatchReason::SharedName
                },
            ]
        );
    }

    #[test]
    fn test_attribute_merge_prefers_confidence_then_first_seen() {
        let mut first = record(Some("john.smith"), None, None);
        first.location = Some("Austin".into());
        first.name = Some("John".into());
        first.confidence = Some(0.5);
        let mut second = record(Some("john.smith"), None, None);
        second.location = Some("Dallas".into());
        second.name = Some("John Smith".into());
        second.confidence = Some(0.8);
        let mut third = record(Some("john.smith"), None, None);
        third.name = Some("Johnny".into());
        third.confidence = Some(0.8);

        let resolution = EntityResolver::new().resolve(&[first, second, third]);
        let entity = &resolution.entities()[0];
        assert_eq!(entity.attribute("location"), Some("Dallas"));
        assert_eq!(entity.attribute("name"), Some("John Smith"));
        assert_eq!(entity.attributes["name"].confidence, 0.8);
    }

    #[test]
    fn test_records_without_identifiers_are_unresolved() {
        let mut anonymous = ProfileRecord::default();
        anonymous.name = Some("Nobody".into());
        let resolution =
            EntityResolver::new().resolve(&[anonymous, record(Some("x.y"), None, None)]);
        assert_eq!(resolution.unresolved(), 1);
        assert!(resolution.entity_for_record(0).is_none());
        assert_eq!(resolution.entity_for_record(1).unwrap().canonical_id, "x.y");
    }

    #[test]
    fn test_lookup_by_raw_identifier() {
        let records = vec![record(Some("john.smith"), Some("100004"), None)];
        let resolution = EntityResolver::new().resolve(&records);
        assert_eq!(resolution.lookup("@John.Smith").unwrap().canonical_id, "100004");
        assert_eq!(
            resolution
                .lookup("https://www.facebook.com/profile.php?id=100004")
                .unwrap()
                .canonical_id,
            "100004"
        );
        assert!(resolution.lookup("someone.else").is_none());
        assert_eq!(resolution.mapping()["john.smith"], "100004");
    }

    #[test]
    fn test_entities_in_first_seen_order() {
        let records = vec![
            record(Some("zed"), None, None),
            record(Some("amy"), None, None),
            record(Some("zed"), None, None),
        ];
        let resolution = EntityResolver::new().resolve(&records);
        let ids: Vec<_> = resolution
            .entities()
            .iter()
            .map(|e| e.canonical_id.as_str())
            .collect();
        assert_eq!(ids, vec!["zed", "amy"]);
    }
}
