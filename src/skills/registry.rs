use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use super::metadata::SkillMetadata;
use super::Skill;
use crate::error::AgentError;

/// Result of resolving a simple name that may be registered more than once.
#[derive(Debug)]
pub enum Lookup<T> {
    Unique(T),
    /// The name maps to several qualified keys; the full mapping is handed
    /// back for caller disambiguation.
    Ambiguous(BTreeMap<String, T>),
}

impl<T> Lookup<T> {
    pub fn unique(self) -> Option<T> {
        match self {
            Lookup::Unique(value) => Some(value),
            Lookup::Ambiguous(_) => None,
        }
    }
}

/// Partial metadata update merged into an existing skill's metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub description: Option<String>,
    pub version: Option<String>,
    pub add_tags: BTreeSet<String>,
    pub param_descriptions: BTreeMap<String, String>,
}

/// Catalog of registered skills, keyed by qualified key
/// (`origin::name`) with a secondary index on simple names.
///
/// Name collisions never overwrite: the first-registered skill stays the
/// primary resolution for its simple name, later registrants are kept and
/// tracked in the duplicates map. No internal locking — callers serialize
/// mutation against concurrent runs that read the registry, or hand a run
/// an immutable snapshot built via the set operations.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Skill>,
    /// Qualified keys in registration order.
    order: Vec<String>,
    /// Simple name -> qualified keys, first element is the primary.
    by_name: BTreeMap<String, Vec<String>>,
    /// Simple name -> shadowed (non-primary) qualified keys.
    duplicates: BTreeMap<String, Vec<String>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. A colliding simple name is recorded as a duplicate
    /// (warning, not a failure); a colliding qualified key is rejected.
    /// Returns the qualified key.
    pub fn register(&mut self, skill: Skill) -> Result<String, AgentError> {
        let key = skill.qualified_key();
        if self.skills.contains_key(&key) {
            return Err(AgentError::Config(format!(
                "skill '{key}' is already registered"
            )));
        }

        let name = skill.name().to_string();
        if let Some(existing) = self.by_name.get(&name).and_then(|keys| keys.first()) {
            warn!(
                name = %name,
                primary = %existing,
                shadowed = %key,
                "duplicate skill name, first-registered skill stays primary"
            );
            self.duplicates.entry(name.clone()).or_default().push(key.clone());
        }

        self.by_name.entry(name).or_default().push(key.clone());
        self.order.push(key.clone());
        self.skills.insert(key.clone(), skill);
        Ok(key)
    }

    /// Resolve a simple name. Ambiguous names return the full
    /// qualified-key mapping instead of guessing.
    pub fn get_by_name(&self, name: &str) -> Option<Lookup<&Skill>> {
        let keys = self.by_name.get(name)?;
        match keys.as_slice() {
            [] => None,
            [key] => Some(Lookup::Unique(&self.skills[key])),
            keys => Some(Lookup::Ambiguous(
                keys.iter()
                    .map(|key| (key.clone(), &self.skills[key]))
                    .collect(),
            )),
        }
    }

    /// Same resolution policy as `get_by_name`, applied to metadata.
    pub fn get_metadata_by_name(&self, name: &str) -> Option<Lookup<&SkillMetadata>> {
        Some(match self.get_by_name(name)? {
            Lookup::Unique(skill) => Lookup::Unique(&skill.metadata),
            Lookup::Ambiguous(map) => Lookup::Ambiguous(
                map.into_iter()
                    .map(|(key, skill)| (key, &skill.metadata))
                    .collect(),
            ),
        })
    }

    /// First-registered resolution for a simple name.
    pub fn primary(&self, name: &str) -> Option<&Skill> {
        let key = self.by_name.get(name)?.first()?;
        self.skills.get(key)
    }

    pub fn get(&self, qualified_key: &str) -> Option<&Skill> {
        self.skills.get(qualified_key)
    }

    /// Skills whose tag set contains `tag`, in registration order.
    pub fn get_by_tag(&self, tag: &str) -> Vec<&Skill> {
        self.iter()
            .filter(|skill| skill.metadata.tags.contains(tag))
            .collect()
    }

    /// Shadowed skills registered under `name`, oldest first.
    pub fn duplicates(&self, name: &str) -> Vec<&Skill> {
        self.duplicates
            .get(name)
            .map(|keys| keys.iter().map(|key| &self.skills[key]).collect())
            .unwrap_or_default()
    }

    /// Remove a registration. With an origin, removes exactly that entry;
    /// without one, the name must be unambiguous — multiple registrations
    /// fail rather than guessing, leaving the registry unchanged.
    pub fn remove(&mut self, name: &str, origin: Option<&str>) -> Result<Skill, AgentError> {
        let keys = self
            .by_name
            .get(name)
            .ok_or_else(|| AgentError::UnknownSkill(name.into()))?;

        let key = match origin {
            Some(origin) => {
                let key = format!("{origin}::{name}");
                if !keys.contains(&key) {
                    return Err(AgentError::UnknownSkill(key));
                }
                key
            }
            None if keys.len() > 1 => {
                return Err(AgentError::Ambiguous {
                    name: name.into(),
                    origins: keys
                        .iter()
                        .map(|key| self.skills[key].metadata.origin.clone())
                        .collect(),
                });
            }
            None => keys[0].clone(),
        };

        let skill = self
            .skills
            .remove(&key)
            .ok_or_else(|| AgentError::UnknownSkill(key.clone()))?;
        self.order.retain(|k| k != &key);

        let remaining = self.by_name.get_mut(name).expect("indexed name");
        remaining.retain(|k| k != &key);
        if remaining.is_empty() {
            self.by_name.remove(name);
            self.duplicates.remove(name);
        } else {
            // The duplicates list mirrors everything behind the primary;
            // removing the primary promotes the next registrant.
            let shadowed = remaining[1..].to_vec();
            if shadowed.is_empty() {
                self.duplicates.remove(name);
            } else {
                self.duplicates.insert(name.into(), shadowed);
            }
        }

        Ok(skill)
    }

    /// Reset registry, index and duplicates to empty, atomically.
    pub fn clear(&mut self) {
        self.skills.clear();
        self.order.clear();
        self.by_name.clear();
        self.duplicates.clear();
    }

    /// Merge a patch into an existing skill's metadata.
    pub fn update_metadata(
        &mut self,
        qualified_key: &str,
        patch: MetadataPatch,
    ) -> Result<(), AgentError> {
        let skill = self
            .skills
            .get_mut(qualified_key)
            .ok_or_else(|| AgentError::UnknownSkill(qualified_key.into()))?;

        let metadata = &mut skill.metadata;
        if let Some(description) = patch.description {
            metadata.description = description;
        }
        if let Some(version) = patch.version {
            metadata.version = version;
        }
        metadata.tags.extend(patch.add_tags);
        for (param, description) in patch.param_descriptions {
            match metadata
                .parameters
                .as_mut()
                .and_then(|params| params.iter_mut().find(|p| p.name == param))
            {
                Some(spec) => spec.description = description,
                None => warn!(
                    key = %qualified_key,
                    param = %param,
                    "metadata patch names an undeclared parameter, ignoring"
                ),
            }
        }
        Ok(())
    }

    /// All skills in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Skill> {
        self.order.iter().map(|key| &self.skills[key])
    }

    /// Unique simple names in first-registration order.
    pub fn skill_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.iter()
            .filter(|skill| seen.insert(skill.name().to_string()))
            .map(|skill| skill.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::metadata::ParamType;
    use crate::skills::SkillHandler;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Tagged(&'static str);

    #[async_trait]
    impl SkillHandler for Tagged {
        async fn call(&self, _args: &Value) -> Result<Value, String> {
            Ok(json!(self.0))
        }
    }

    fn skill(name: &str, origin: &str, marker: &'static str) -> Skill {
        Skill::builder(name)
            .origin(origin)
            .param("x", ParamType::String)
            .build(Tagged(marker))
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_name_keeps_first_as_primary() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "first")).unwrap();
        reg.register(skill("fetch", "fs", "second")).unwrap();

        let primary = reg.primary("fetch").unwrap();
        assert_eq!(primary.metadata.origin, "web");
        assert_eq!(primary.execute(&json!({})).await.unwrap(), json!("first"));

        let shadowed = reg.duplicates("fetch");
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed[0].metadata.origin, "fs");
        // Nothing is lost: both live in the primary map.
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn ambiguous_lookup_returns_full_mapping() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "a")).unwrap();
        reg.register(skill("fetch", "fs", "b")).unwrap();

        match reg.get_by_name("fetch").unwrap() {
            Lookup::Ambiguous(map) => {
                assert_eq!(map.len(), 2);
                assert!(map.contains_key("web::fetch"));
                assert!(map.contains_key("fs::fetch"));
            }
            Lookup::Unique(_) => panic!("expected ambiguous lookup"),
        }

        match reg.get_metadata_by_name("fetch").unwrap() {
            Lookup::Ambiguous(map) => assert_eq!(map.len(), 2),
            Lookup::Unique(_) => panic!("expected ambiguous metadata lookup"),
        }
    }

    #[test]
    fn unique_helper_collapses_only_unambiguous_lookups() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("solo", "m", "a")).unwrap();
        reg.register(skill("fetch", "web", "b")).unwrap();
        reg.register(skill("fetch", "fs", "c")).unwrap();

        let solo = reg.get_by_name("solo").unwrap().unique().unwrap();
        assert_eq!(solo.metadata.origin, "m");
        assert!(reg.get_by_name("fetch").unwrap().unique().is_none());
    }

    #[test]
    fn same_qualified_key_is_rejected() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "a")).unwrap();
        let err = reg.register(skill("fetch", "web", "b")).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_without_origin_fails_on_ambiguity() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "a")).unwrap();
        reg.register(skill("fetch", "fs", "b")).unwrap();

        let err = reg.remove("fetch", None).unwrap_err();
        assert!(matches!(err, AgentError::Ambiguous { .. }));
        // Registry unchanged.
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.duplicates("fetch").len(), 1);
    }

    #[test]
    fn remove_primary_promotes_next_registrant() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "a")).unwrap();
        reg.register(skill("fetch", "fs", "b")).unwrap();

        let removed = reg.remove("fetch", Some("web")).unwrap();
        assert_eq!(removed.metadata.origin, "web");
        assert_eq!(reg.primary("fetch").unwrap().metadata.origin, "fs");
        assert!(reg.duplicates("fetch").is_empty());

        reg.remove("fetch", Some("fs")).unwrap();
        assert!(reg.get_by_name("fetch").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_unknown_name_or_origin() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "a")).unwrap();

        assert!(matches!(
            reg.remove("nope", None),
            Err(AgentError::UnknownSkill(_))
        ));
        assert!(matches!(
            reg.remove("fetch", Some("fs")),
            Err(AgentError::UnknownSkill(_))
        ));
    }

    #[test]
    fn clear_empties_everything() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("a", "m", "x")).unwrap();
        reg.register(skill("a", "n", "y")).unwrap();
        reg.register(skill("b", "m", "z")).unwrap();

        reg.clear();
        assert!(reg.is_empty());
        assert!(reg.skill_names().is_empty());
        assert!(reg.duplicates("a").is_empty());
    }

    #[test]
    fn tag_lookup() {
        let mut reg = SkillRegistry::new();
        let tagged = Skill::builder("search")
            .origin("web")
            .tag("network")
            .param("q", ParamType::String)
            .build(Tagged("s"))
            .unwrap();
        reg.register(tagged).unwrap();
        reg.register(skill("local", "fs", "l")).unwrap();

        let hits = reg.get_by_tag("network");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name(), "search");
        assert!(reg.get_by_tag("missing").is_empty());
    }

    #[test]
    fn update_metadata_merges_patch() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("fetch", "web", "a")).unwrap();

        reg.update_metadata(
            "web::fetch",
            MetadataPatch {
                description: Some("Fetch a URL".into()),
                version: Some("2.0.0".into()),
                add_tags: ["network".to_string()].into(),
                param_descriptions: [("x".to_string(), "The URL".to_string())].into(),
            },
        )
        .unwrap();

        let meta = &reg.primary("fetch").unwrap().metadata;
        assert_eq!(meta.description, "Fetch a URL");
        assert_eq!(meta.version, "2.0.0");
        assert!(meta.tags.contains("network"));
        assert_eq!(meta.param("x").unwrap().description, "The URL");

        assert!(matches!(
            reg.update_metadata("web::nope", MetadataPatch::default()),
            Err(AgentError::UnknownSkill(_))
        ));
    }

    #[test]
    fn skill_names_are_unique_in_registration_order() {
        let mut reg = SkillRegistry::new();
        reg.register(skill("beta", "m", "1")).unwrap();
        reg.register(skill("alpha", "m", "2")).unwrap();
        reg.register(skill("beta", "n", "3")).unwrap();

        assert_eq!(reg.skill_names(), vec!["beta", "alpha"]);
    }
}
