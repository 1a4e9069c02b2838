//! Bulk registration from external sources: a manifest file, a directory of
//! manifests, or an already-in-memory `SkillModule`.
//!
//! A manifest is a JSON file holding one skill declaration or an array of
//! them. A JSON value carries skill metadata iff it has `name` and
//! `parameters` keys; anything else in the file is skipped. Execution bodies
//! are looked up by name in a caller-supplied binding table.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::metadata::{ParamSpec, ParamType, SkillMetadata, NO_DESCRIPTION};
use super::registry::SkillRegistry;
use super::{Skill, SkillHandler, SkillModule};
use crate::error::AgentError;

/// Name -> execution body table consulted while loading manifests.
#[derive(Default)]
pub struct SkillBindings {
    handlers: BTreeMap<String, Arc<dyn SkillHandler>>,
}

impl SkillBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, handler: impl SkillHandler + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    fn get(&self, name: &str) -> Option<Arc<dyn SkillHandler>> {
        self.handlers.get(name).map(Arc::clone)
    }
}

/// Metadata predicate applied before registration.
#[derive(Debug, Clone, Default)]
pub struct SkillFilter {
    pub name: Option<String>,
    pub tags: BTreeSet<String>,
}

impl SkillFilter {
    /// Accept everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    fn matches(&self, metadata: &SkillMetadata) -> bool {
        if let Some(ref name) = self.name {
            if metadata.name != *name {
                return false;
            }
        }
        self.tags.iter().all(|tag| metadata.tags.contains(tag))
    }
}

/// Aggregate outcome of a directory load. Per-file failures never abort the
/// other files' loads.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// File name -> simple names registered from it.
    pub loaded: BTreeMap<String, Vec<String>>,
    /// File name -> what went wrong.
    pub errors: BTreeMap<String, String>,
}

/// Parse one manifest's text into metadata entries, `origin` being the
/// defining context recorded on each.
fn parse_manifest(origin: &str, text: &str) -> Result<Vec<SkillMetadata>, AgentError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| AgentError::Load(format!("invalid manifest JSON: {e}")))?;

    let entries = match value {
        Value::Array(entries) => entries,
        single => vec![single],
    };

    let mut out = Vec::new();
    for entry in &entries {
        let Some(obj) = entry.as_object() else {
            debug!("manifest entry is not an object, skipping");
            continue;
        };
        // Only values carrying skill metadata are candidates.
        let (Some(name), Some(params)) = (
            obj.get("name").and_then(Value::as_str),
            obj.get("parameters").and_then(Value::as_object),
        ) else {
            debug!("manifest entry without name/parameters, skipping");
            continue;
        };

        let mut parameters = Vec::new();
        for (param_name, spec) in params {
            let ty = spec
                .get("type")
                .map(ParamType::from_json)
                .unwrap_or(ParamType::Any);
            parameters.push(ParamSpec {
                name: param_name.clone(),
                ty,
                description: spec
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or(NO_DESCRIPTION)
                    .into(),
                default: spec.get("default").cloned(),
                enum_values: spec
                    .get("enum")
                    .and_then(Value::as_array)
                    .cloned(),
            });
        }

        let required = parameters
            .iter()
            .filter(|p| p.default.is_none())
            .map(|p| p.name.clone())
            .collect();

        out.push(SkillMetadata {
            name: name.into(),
            origin: origin.into(),
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or(NO_DESCRIPTION)
                .into(),
            parameters: Some(parameters),
            required,
            tags: obj
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            version: obj
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or("1.0.0")
                .into(),
        });
    }

    Ok(out)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".into())
}

/// Register every matching skill declared in one manifest file. The file's
/// stem becomes the defining context. All declared entries must have a
/// handler bound before any of them is registered.
pub async fn load_file(
    registry: &mut SkillRegistry,
    path: impl AsRef<Path>,
    bindings: &SkillBindings,
    filter: &SkillFilter,
) -> Result<Vec<String>, AgentError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AgentError::Load(format!("cannot read {}: {e}", path.display())))?;

    let entries = parse_manifest(&file_stem(path), &text)?;
    register_entries(registry, entries, bindings, filter)
}

fn register_entries(
    registry: &mut SkillRegistry,
    entries: Vec<SkillMetadata>,
    bindings: &SkillBindings,
    filter: &SkillFilter,
) -> Result<Vec<String>, AgentError> {
    let matching: Vec<SkillMetadata> = entries
        .into_iter()
        .filter(|metadata| filter.matches(metadata))
        .collect();

    // Validate bindings up front so a missing handler registers nothing.
    let mut bound = Vec::with_capacity(matching.len());
    for metadata in matching {
        let handler = bindings.get(&metadata.name).ok_or_else(|| {
            AgentError::Load(format!("no handler bound for skill '{}'", metadata.name))
        })?;
        bound.push(Skill::from_arc(metadata, handler));
    }

    let mut names = Vec::with_capacity(bound.len());
    for skill in bound {
        let name = skill.name().to_string();
        registry.register(skill)?;
        names.push(name);
    }
    Ok(names)
}

/// Load every `.json` manifest in a directory. Each file is read and parsed
/// on its own task; results are merged deterministically keyed by file name.
/// One bad file never aborts the others — its failure lands in the report.
pub async fn load_dir(
    registry: &mut SkillRegistry,
    dir: impl AsRef<Path>,
    bindings: &SkillBindings,
    filter: &SkillFilter,
) -> Result<LoadReport, AgentError> {
    let dir = dir.as_ref();
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| AgentError::Load(format!("cannot read {}: {e}", dir.display())))?;

    let mut tasks: JoinSet<(String, PathBuf, Result<Vec<SkillMetadata>, String>)> = JoinSet::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| AgentError::Load(format!("cannot read {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        tasks.spawn(async move {
            let parsed = match tokio::fs::read_to_string(&path).await {
                Ok(text) => parse_manifest(&file_stem(&path), &text).map_err(|e| e.to_string()),
                Err(e) => Err(format!("cannot read {}: {e}", path.display())),
            };
            (file_name, path, parsed)
        });
    }

    let mut parsed: BTreeMap<String, Result<Vec<SkillMetadata>, String>> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((file_name, _, result)) => {
                parsed.insert(file_name, result);
            }
            Err(e) => {
                warn!(error = %e, "manifest load task panicked");
            }
        }
    }

    // Registration is serialized here; the merge order is the file-name
    // order, independent of task completion order.
    let mut report = LoadReport::default();
    for (file_name, result) in parsed {
        match result.and_then(|entries| {
            register_entries(registry, entries, bindings, filter).map_err(|e| e.to_string())
        }) {
            Ok(names) => {
                info!(file = %file_name, skills = names.len(), "loaded skill manifest");
                report.loaded.insert(file_name, names);
            }
            Err(error) => {
                warn!(file = %file_name, %error, "skill manifest failed to load");
                report.errors.insert(file_name, error);
            }
        }
    }
    Ok(report)
}

/// Register a module's skills as a batch. The module name becomes the
/// defining context of every skill it contributes.
pub fn load_module(
    registry: &mut SkillRegistry,
    module: &dyn SkillModule,
    filter: &SkillFilter,
) -> Result<Vec<String>, AgentError> {
    let mut names = Vec::new();
    for mut skill in module.skills() {
        skill.metadata.origin = module.name().into();
        if !filter.matches(&skill.metadata) {
            continue;
        }
        let name = skill.name().to_string();
        registry.register(skill)?;
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl SkillHandler for Echo {
        async fn call(&self, args: &Value) -> Result<Value, String> {
            Ok(args.clone())
        }
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn manifest(name: &str) -> String {
        json!({
            "name": name,
            "description": format!("The {name} skill"),
            "parameters": {
                "q": {"type": "string", "description": "Query"}
            },
            "tags": ["test"]
        })
        .to_string()
    }

    fn bindings(names: &[&str]) -> SkillBindings {
        names
            .iter()
            .fold(SkillBindings::new(), |b, name| b.bind(*name, Echo))
    }

    #[tokio::test]
    async fn load_file_registers_with_file_stem_origin() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web.json", &manifest("search"));

        let mut reg = SkillRegistry::new();
        let names = load_file(
            &mut reg,
            dir.path().join("web.json"),
            &bindings(&["search"]),
            &SkillFilter::any(),
        )
        .await
        .unwrap();

        assert_eq!(names, vec!["search"]);
        let skill = reg.primary("search").unwrap();
        assert_eq!(skill.metadata.origin, "web");
        assert_eq!(skill.metadata.required, vec!["q"]);
        assert!(skill.metadata.tags.contains("test"));
    }

    #[tokio::test]
    async fn manifest_parameter_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        // Deliberately not in alphabetical order.
        write(
            dir.path(),
            "ordered.json",
            r#"{
                "name": "range",
                "parameters": {
                    "stop": {"type": "integer"},
                    "start": {"type": "integer"},
                    "step": {"type": "integer", "default": 1}
                }
            }"#,
        );

        let mut reg = SkillRegistry::new();
        load_file(
            &mut reg,
            dir.path().join("ordered.json"),
            &bindings(&["range"]),
            &SkillFilter::any(),
        )
        .await
        .unwrap();

        let meta = &reg.primary("range").unwrap().metadata;
        let names: Vec<_> = meta
            .parameters
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["stop", "start", "step"]);
        assert_eq!(meta.required, vec!["stop", "start"]);
    }

    #[tokio::test]
    async fn one_bad_file_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d"] {
            write(dir.path(), &format!("{name}.json"), &manifest(name));
        }
        write(dir.path(), "bad.json", "{ not json at all");

        let mut reg = SkillRegistry::new();
        let report = load_dir(
            &mut reg,
            dir.path(),
            &bindings(&["a", "b", "c", "d"]),
            &SkillFilter::any(),
        )
        .await
        .unwrap();

        assert_eq!(report.loaded.len(), 4);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors.contains_key("bad.json"));
        assert_eq!(reg.len(), 4);
    }

    #[tokio::test]
    async fn missing_binding_is_a_per_file_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ok.json", &manifest("a"));
        write(dir.path(), "unbound.json", &manifest("mystery"));

        let mut reg = SkillRegistry::new();
        let report = load_dir(&mut reg, dir.path(), &bindings(&["a"]), &SkillFilter::any())
            .await
            .unwrap();

        assert_eq!(report.loaded.len(), 1);
        assert!(report.errors["unbound.json"].contains("no handler bound"));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn filter_by_tag_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let entries = json!([
            {
                "name": "tagged",
                "parameters": {},
                "tags": ["net"]
            },
            {
                "name": "untagged",
                "parameters": {}
            },
            {"not_a_skill": true}
        ]);
        write(dir.path(), "mixed.json", &entries.to_string());

        let mut reg = SkillRegistry::new();
        let names = load_file(
            &mut reg,
            dir.path().join("mixed.json"),
            &bindings(&["tagged", "untagged"]),
            &SkillFilter::any().with_tag("net"),
        )
        .await
        .unwrap();
        assert_eq!(names, vec!["tagged"]);

        let mut reg2 = SkillRegistry::new();
        let names = load_file(
            &mut reg2,
            dir.path().join("mixed.json"),
            &bindings(&["tagged", "untagged"]),
            &SkillFilter::named("untagged"),
        )
        .await
        .unwrap();
        assert_eq!(names, vec!["untagged"]);
    }

    #[tokio::test]
    async fn load_module_sets_origin_to_module_name() {
        struct MathModule;

        impl SkillModule for MathModule {
            fn name(&self) -> &str {
                "math"
            }

            fn skills(&self) -> Vec<Skill> {
                vec![
                    Skill::builder("add")
                        .param("a", ParamType::Integer)
                        .build(Echo)
                        .unwrap(),
                    Skill::builder("mul")
                        .tag("fast")
                        .param("a", ParamType::Integer)
                        .build(Echo)
                        .unwrap(),
                ]
            }
        }

        let mut reg = SkillRegistry::new();
        let names = load_module(&mut reg, &MathModule, &SkillFilter::any()).unwrap();
        assert_eq!(names, vec!["add", "mul"]);
        assert_eq!(reg.primary("add").unwrap().metadata.origin, "math");

        let mut filtered = SkillRegistry::new();
        let names =
            load_module(&mut filtered, &MathModule, &SkillFilter::any().with_tag("fast")).unwrap();
        assert_eq!(names, vec!["mul"]);
    }
}
