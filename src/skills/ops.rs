//! Set-algebra composition over registries.
//!
//! All operators key on **simple names**, not qualified keys: composition is
//! keyed on the caller-visible function name, so merging two registries that
//! each define a differently-implemented function of the same name picks the
//! first-registered instance deterministically rather than unioning both as
//! primaries. Inputs are never mutated; every operator returns a new
//! registry.

use std::collections::BTreeSet;

use tracing::debug;

use super::registry::SkillRegistry;

/// Disjoint name sets describing how two registries relate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryComparison {
    pub common: BTreeSet<String>,
    pub unique_to_a: BTreeSet<String>,
    pub unique_to_b: BTreeSet<String>,
}

fn insert(target: &mut SkillRegistry, skill: super::Skill) {
    // A qualified key already present means the same registration reached
    // the result twice (e.g. union of overlapping snapshots); first wins.
    if target.get(&skill.qualified_key()).is_some() {
        debug!(key = %skill.qualified_key(), "already present, skipping");
        return;
    }
    target
        .register(skill)
        .expect("collision handled before registration");
}

/// New registry containing every skill from every input, in input order.
/// Colliding simple names follow the registry's own collision policy:
/// the first registrant stays primary, later ones become duplicates.
pub fn union(registries: &[&SkillRegistry]) -> SkillRegistry {
    let mut result = SkillRegistry::new();
    for registry in registries {
        for skill in registry.iter() {
            insert(&mut result, skill.clone());
        }
    }
    result
}

/// New registry with the names present in **all** inputs; instances are
/// taken from the first input's primary resolution.
pub fn intersection(registries: &[&SkillRegistry]) -> SkillRegistry {
    let mut result = SkillRegistry::new();
    let Some((first, rest)) = registries.split_first() else {
        return result;
    };

    for name in first.skill_names() {
        if rest.iter().all(|r| r.primary(&name).is_some()) {
            if let Some(skill) = first.primary(&name) {
                insert(&mut result, skill.clone());
            }
        }
    }
    result
}

/// New registry with the names in `base` absent from `exclude`; instances
/// from `base`.
pub fn difference(base: &SkillRegistry, exclude: &SkillRegistry) -> SkillRegistry {
    let mut result = SkillRegistry::new();
    for name in base.skill_names() {
        if exclude.primary(&name).is_none() {
            if let Some(skill) = base.primary(&name) {
                insert(&mut result, skill.clone());
            }
        }
    }
    result
}

/// New registry with the names present in exactly one of `a` or `b`;
/// each instance comes from whichever side has it.
pub fn symmetric_difference(a: &SkillRegistry, b: &SkillRegistry) -> SkillRegistry {
    let mut result = SkillRegistry::new();
    for skill in a.skill_names().iter().filter_map(|name| {
        b.primary(name).is_none().then(|| a.primary(name)).flatten()
    }) {
        insert(&mut result, skill.clone());
    }
    for skill in b.skill_names().iter().filter_map(|name| {
        a.primary(name).is_none().then(|| b.primary(name)).flatten()
    }) {
        insert(&mut result, skill.clone());
    }
    result
}

/// Pure comparison of two registries' name sets.
pub fn compare(a: &SkillRegistry, b: &SkillRegistry) -> RegistryComparison {
    let a_names: BTreeSet<String> = a.skill_names().into_iter().collect();
    let b_names: BTreeSet<String> = b.skill_names().into_iter().collect();

    RegistryComparison {
        common: a_names.intersection(&b_names).cloned().collect(),
        unique_to_a: a_names.difference(&b_names).cloned().collect(),
        unique_to_b: b_names.difference(&a_names).cloned().collect(),
    }
}
