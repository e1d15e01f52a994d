use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool declaration in the shape the model API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<&Tool> for ToolDeclaration {
    fn from(tool: &Tool) -> Self {
        Self {
            kind: "custom".to_string(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

pub fn to_declarations(tools: &[Tool]) -> Vec<ToolDeclaration> {
    tools.iter().map(ToolDeclaration::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.into(),
            description: format!("{name} description"),
            input_schema: json!({
                "type": "object",
                "properties": {"repo": {"type": "string"}},
                "required": ["repo"]
            }),
        }
    }

    #[test]
    fn preserves_every_tool() {
        let tools = vec![tool("read_file"), tool("search_github"), tool("list_issues")];
        let declarations = to_declarations(&tools);

        assert_eq!(declarations.len(), tools.len());
        for (tool, declaration) in tools.iter().zip(&declarations) {
            assert_eq!(declaration.kind, "custom");
            assert_eq!(declaration.name, tool.name);
            assert_eq!(declaration.description, tool.description);
            assert_eq!(declaration.input_schema, tool.input_schema);
        }
    }

    #[test]
    fn empty_catalog_gives_no_declarations() {
        assert!(to_declarations(&[]).is_empty());
    }

    #[test]
    fn serializes_in_model_shape() {
        let value = serde_json::to_value(ToolDeclaration::from(&tool("read_file"))).unwrap();
        assert_eq!(value["type"], json!("custom"));
        assert!(value.get("input_schema").is_some());
        assert!(value.get("inputSchema").is_none());
    }

    #[test]
    fn missing_description_defaults_to_empty() {
        let parsed: Tool = serde_json::from_value(json!({
            "name": "ping",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(parsed.description, "");
    }
}
