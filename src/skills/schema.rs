use serde_json::{json, Map, Value};

use super::metadata::{ParamType, SkillMetadata};
use crate::error::AgentError;

fn type_schema(ty: &ParamType) -> Value {
    match ty {
        ParamType::Array(Some(inner)) => json!({
            "type": "array",
            "items": type_schema(inner),
        }),
        ParamType::Array(None) => json!({"type": "array"}),
        ParamType::Object(Some(inner)) => json!({
            "type": "object",
            "additionalProperties": type_schema(inner),
        }),
        ParamType::Object(None) => json!({"type": "object"}),
        flat => json!({"type": flat.tag()}),
    }
}

/// Render one skill's metadata into the wire-level tool object:
///
/// ```json
/// { "type": "function", "function": { "name", "description",
///   "parameters": { "type": "object", "properties": {...}, "required": [...] } } }
/// ```
///
/// Metadata without a parameters block fails loudly — it marks a skill that
/// was registered without proper introspection. The `required` list is
/// emitted verbatim from the metadata, not recomputed.
pub fn format_tool(metadata: &SkillMetadata) -> Result<Value, AgentError> {
    let params = metadata.parameters.as_ref().ok_or_else(|| {
        AgentError::Config(format!(
            "skill metadata for '{}' is missing its parameters block",
            metadata.name
        ))
    })?;

    let mut properties = Map::new();
    for param in params {
        let mut property = match type_schema(&param.ty) {
            Value::Object(map) => map,
            _ => unreachable!("type schema is always an object"),
        };
        property.insert("description".into(), json!(param.description));
        if let Some(ref default) = param.default {
            property.insert("default".into(), default.clone());
        }
        if let Some(ref values) = param.enum_values {
            property.insert("enum".into(), json!(values));
        }
        properties.insert(param.name.clone(), Value::Object(property));
    }

    Ok(json!({
        "type": "function",
        "function": {
            "name": metadata.name,
            "description": metadata.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": metadata.required,
            },
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::metadata::Param;
    use crate::skills::{Skill, SkillHandler};
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl SkillHandler for Noop {
        async fn call(&self, _args: &Value) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn formats_required_verbatim() {
        let skill = Skill::builder("add")
            .description("Add numbers")
            .param("a", ParamType::Integer)
            .param_default("b", ParamType::String, "x")
            .build(Noop)
            .unwrap();

        let tool = format_tool(&skill.metadata).unwrap();
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "add");
        assert_eq!(tool["function"]["parameters"]["type"], "object");
        assert_eq!(
            tool["function"]["parameters"]["required"],
            json!(["a"])
        );
        assert_eq!(
            tool["function"]["parameters"]["properties"]["a"]["type"],
            "integer"
        );
        assert_eq!(
            tool["function"]["parameters"]["properties"]["b"]["default"],
            "x"
        );
    }

    #[test]
    fn nested_types_are_inlined() {
        let skill = Skill::builder("batch")
            .param(
                "ids",
                ParamType::Array(Some(Box::new(ParamType::Integer))),
            )
            .param(
                "labels",
                ParamType::Object(Some(Box::new(ParamType::String))),
            )
            .build(Noop)
            .unwrap();

        let props = &format_tool(&skill.metadata).unwrap()["function"]["parameters"]["properties"];
        assert_eq!(props["ids"]["type"], "array");
        assert_eq!(props["ids"]["items"]["type"], "integer");
        assert_eq!(props["labels"]["type"], "object");
        assert_eq!(props["labels"]["additionalProperties"]["type"], "string");
    }

    #[test]
    fn enum_constraint_carries_through() {
        let skill = Skill::builder("convert")
            .param_with(
                "unit",
                ParamType::String,
                Param::new("Target unit").with_enum(vec![json!("km"), json!("mi")]),
            )
            .build(Noop)
            .unwrap();

        let props = &format_tool(&skill.metadata).unwrap()["function"]["parameters"]["properties"];
        assert_eq!(props["unit"]["enum"], json!(["km", "mi"]));
        assert_eq!(props["unit"]["description"], "Target unit");
    }

    #[test]
    fn missing_parameters_fails_loudly() {
        let mut skill = Skill::builder("bare").build(Noop).unwrap();
        skill.metadata.parameters = None;
        let err = format_tool(&skill.metadata).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
