use serde::{Deserialize, Serialize};

/// One tool invocation requested by the model over the data channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition advertised to the model in the session update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_stay_json() {
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "search_knowledge".into(),
            arguments: serde_json::json!({ "query_original": "Barcelona" }),
        };
        let round = serde_json::to_string(&call).unwrap();
        let back: ToolCall = serde_json::from_str(&round).unwrap();
        assert_eq!(back.arguments["query_original"], "Barcelona");
    }
}
