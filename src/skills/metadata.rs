use std::collections::BTreeSet;

use serde_json::Value;
use tracing::warn;

use super::{Skill, SkillHandler};
use crate::error::AgentError;

pub const NO_DESCRIPTION: &str = "No description provided";

/// Internal type tag for a skill parameter. Maps onto the wire vocabulary
/// `{integer, number, string, boolean, array, object, any}`; array and
/// object carry nested item/value type info when statically known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
    Array(Option<Box<ParamType>>),
    Object(Option<Box<ParamType>>),
    Any,
}

impl ParamType {
    pub fn tag(&self) -> &'static str {
        match self {
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Array(_) => "array",
            ParamType::Object(_) => "object",
            ParamType::Any => "any",
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            ParamType::Array(Some(_)) | ParamType::Object(Some(_))
        )
    }

    /// Parse a JSON-schema-shaped type descriptor. Unresolvable tags
    /// default to `String`.
    pub fn from_json(value: &Value) -> ParamType {
        match value {
            Value::String(tag) => Self::from_tag(tag),
            Value::Object(map) => {
                let tag = map.get("type").and_then(Value::as_str).unwrap_or("string");
                match tag {
                    "array" | "list" => {
                        let inner = map
                            .get("items")
                            .map(|v| Box::new(Self::from_json(v)));
                        ParamType::Array(inner)
                    }
                    "object" | "dict" => {
                        let inner = map
                            .get("additionalProperties")
                            .map(|v| Box::new(Self::from_json(v)));
                        ParamType::Object(inner)
                    }
                    other => Self::from_tag(other),
                }
            }
            _ => ParamType::String,
        }
    }

    fn from_tag(tag: &str) -> ParamType {
        match tag {
            "integer" | "int" => ParamType::Integer,
            "number" | "float" => ParamType::Number,
            "string" | "str" => ParamType::String,
            "boolean" | "bool" => ParamType::Boolean,
            "array" | "list" => ParamType::Array(None),
            "object" | "dict" => ParamType::Object(None),
            "any" => ParamType::Any,
            _ => ParamType::String,
        }
    }
}

/// Rich parameter declaration carrying a description, an optional stored
/// default, and an optional enum constraint. A `Param` with no default
/// declares a required parameter.
#[derive(Debug, Clone, Default)]
pub struct Param {
    pub description: String,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
}

impl Param {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            default: None,
            enum_values: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// One declared parameter of a skill.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
}

/// Structured schema describing a skill, captured at declaration time and
/// immutable afterwards except through `SkillRegistry::update_metadata`.
#[derive(Debug, Clone)]
pub struct SkillMetadata {
    pub name: String,
    /// Defining context (module name, manifest file stem, ...).
    pub origin: String,
    pub description: String,
    /// Ordered parameter list. `None` marks a skill registered without
    /// proper introspection; the schema formatter rejects it.
    pub parameters: Option<Vec<ParamSpec>>,
    /// Exactly the parameters without a default at declaration time.
    pub required: Vec<String>,
    pub tags: BTreeSet<String>,
    pub version: String,
}

impl SkillMetadata {
    pub fn qualified_key(&self) -> String {
        format!("{}::{}", self.origin, self.name)
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters
            .as_ref()
            .and_then(|params| params.iter().find(|p| p.name == name))
    }
}

/// Declaration-time metadata builder. Stands in for signature reflection:
/// parameter types, defaults and documentation are declared explicitly and
/// turned into a schema without executing the skill.
pub struct SkillBuilder {
    name: String,
    origin: String,
    description: Option<String>,
    docs: Option<String>,
    params: Vec<ParamSpec>,
    tags: BTreeSet<String>,
    version: String,
}

impl SkillBuilder {
    pub(super) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: "local".into(),
            description: None,
            docs: None,
            params: Vec::new(),
            tags: BTreeSet::new(),
            version: "1.0.0".into(),
        }
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Explicit description. Takes precedence over anything parsed from
    /// attached documentation.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach free-form documentation: a summary paragraph, optionally
    /// followed by an `Args:` block of `name: description` lines.
    pub fn docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = Some(docs.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declare a required parameter (no default).
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            description: NO_DESCRIPTION.into(),
            default: None,
            enum_values: None,
        });
        self
    }

    /// Declare an optional parameter with a plain default value.
    pub fn param_default(
        mut self,
        name: impl Into<String>,
        ty: ParamType,
        default: impl Into<Value>,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            description: NO_DESCRIPTION.into(),
            default: Some(default.into()),
            enum_values: None,
        });
        self
    }

    /// Declare a parameter through a rich `Param` wrapper. The wrapper's
    /// stored default decides required-ness.
    pub fn param_with(mut self, name: impl Into<String>, ty: ParamType, param: Param) -> Self {
        let description = if param.description.is_empty() {
            NO_DESCRIPTION.into()
        } else {
            param.description
        };
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            description,
            default: param.default,
            enum_values: param.enum_values,
        });
        self
    }

    /// Finish the declaration and bind the execution body.
    ///
    /// Fails if attached documentation is structurally malformed.
    pub fn build(self, handler: impl SkillHandler + 'static) -> Result<Skill, AgentError> {
        let mut params = self.params;
        let mut description = self.description;

        if let Some(ref docs) = self.docs {
            let parsed = parse_doc(docs)?;
            if description.is_none() && !parsed.summary.is_empty() {
                description = Some(parsed.summary);
            }
            for (name, doc) in parsed.params {
                match params.iter_mut().find(|p| p.name == name) {
                    // An explicit Param description wins over the docstring.
                    Some(spec) if spec.description == NO_DESCRIPTION => {
                        spec.description = doc;
                    }
                    Some(_) => {}
                    None => {
                        warn!(
                            skill = %self.name,
                            param = %name,
                            "documentation describes an undeclared parameter, ignoring"
                        );
                    }
                }
            }
        }

        let required = params
            .iter()
            .filter(|p| p.default.is_none())
            .map(|p| p.name.clone())
            .collect();

        let metadata = SkillMetadata {
            name: self.name,
            origin: self.origin,
            description: description.unwrap_or_else(|| NO_DESCRIPTION.into()),
            parameters: Some(params),
            required,
            tags: self.tags,
            version: self.version,
        };

        Ok(Skill::new(metadata, handler))
    }
}

pub(crate) struct ParsedDoc {
    pub summary: String,
    pub params: Vec<(String, String)>,
}

/// Parse a documentation block: summary up to the first blank line or
/// `Args:` header, then `name: description` pairs. A line inside the args
/// block missing the `:` delimiter is a structural error.
pub(crate) fn parse_doc(text: &str) -> Result<ParsedDoc, AgentError> {
    let mut summary_lines = Vec::new();
    let mut summary_done = false;
    let mut params = Vec::new();
    let mut in_args = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("args:") || trimmed.eq_ignore_ascii_case("arguments:") {
            in_args = true;
            summary_done = true;
            continue;
        }
        if trimmed.eq_ignore_ascii_case("returns:") {
            in_args = false;
            summary_done = true;
            continue;
        }
        if !in_args {
            // Summary is the first paragraph only.
            if trimmed.is_empty() {
                summary_done = !summary_lines.is_empty();
            } else if !summary_done {
                summary_lines.push(trimmed);
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        let Some((name, desc)) = trimmed.split_once(':') else {
            return Err(AgentError::Config(format!(
                "malformed documentation: argument line '{trimmed}' is missing the ':' delimiter"
            )));
        };
        params.push((name.trim().to_string(), desc.trim().to_string()));
    }

    Ok(ParsedDoc {
        summary: summary_lines.join(" "),
        params,
    })
}
