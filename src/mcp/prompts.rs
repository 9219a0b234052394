//! LLM prompt templates served under `prompts://<name>`.

use serde_json::{Value, json};

use crate::datasource::{DataSourceKind, prompts_uri, schema_uri, tool_name};

/// Characters of schema text embedded into a prompt.
const SCHEMA_PROMPT_BUDGET: usize = 15_000;

fn example_args(kind: DataSourceKind) -> (&'static str, Value) {
    match kind {
        DataSourceKind::Sql => (
            "Show me the 5 most recent users",
            json!({"query": "SELECT * FROM users ORDER BY created_at DESC LIMIT 5", "limit": 5}),
        ),
        DataSourceKind::RestApi => (
            "List the first 10 users",
            json!({"query": "GET /users", "limit": 10}),
        ),
        DataSourceKind::Filesystem => (
            "Find markdown files about deployment",
            json!({"query": "search .", "params": {"search_term": "deploy", "extension": "md"}}),
        ),
        DataSourceKind::Jira => (
            "Which bugs are open in PROJ?",
            json!({"query": "project = PROJ AND issuetype = Bug AND status = Open", "limit": 20}),
        ),
    }
}

/// The strict JSON action format the gateway expects back from an LLM.
pub fn action_schema(name: &str, max_limit: usize) -> String {
    format!(
        "You must respond with a single-line minified JSON object with this exact structure:\n\n\
         For tool calls:\n\
         {{\"action\": \"call_tool\", \"tool\": \"{tool}\", \"args\": {{\"query\": \"...\", \"limit\": {max_limit}}}}}\n\n\
         For resource access:\n\
         {{\"action\": \"read_resource\", \"uri\": \"{schema}\"}}\n\n\
         Valid tools: {tool}, refresh_schema, health_check\n\
         Valid resources: {schema}, server://info, {prompts}\n\
         Only read operations are allowed.",
        tool = tool_name(name),
        schema = schema_uri(name),
        prompts = prompts_uri(name),
    )
}

/// Safety constraints and query guidance for one kind of source.
pub fn domain_rules(kind: DataSourceKind) -> &'static str {
    match kind {
        DataSourceKind::Sql => {
            "SAFETY CONSTRAINTS:\n\
             - Only single SELECT statements are allowed\n\
             - No INSERT, UPDATE, DELETE, DROP, ALTER or stored procedure calls\n\
             - Always use a LIMIT clause for potentially large result sets\n\n\
             QUERY GUIDELINES:\n\
             - Validate table and column names against the schema resource\n\
             - Use meaningful column aliases and explicit JOINs\n\
             - Count queries: SELECT COUNT(*) AS total FROM table WHERE condition"
        }
        DataSourceKind::RestApi => {
            "SAFETY CONSTRAINTS:\n\
             - Only GET, HEAD and OPTIONS requests are allowed\n\
             - Paths must be relative to the API base URL and must not contain '..'\n\n\
             QUERY GUIDELINES:\n\
             - Write the query as \"METHOD /path?key=value\"\n\
             - Put filters in params; they are sent as query string parameters\n\
             - Check the schema resource for discovered endpoints first"
        }
        DataSourceKind::Filesystem => {
            "SAFETY CONSTRAINTS:\n\
             - Paths are relative to the configured root and cannot leave it\n\
             - Only reading is supported\n\n\
             QUERY GUIDELINES:\n\
             - Operations: \"list <dir>\", \"search <dir>\", \"read <file>\", \"info <path>\"\n\
             - search takes params.search_term and params.extension\n\
             - Large or binary files cannot be read"
        }
        DataSourceKind::Jira => {
            "SAFETY CONSTRAINTS:\n\
             - Queries are JQL search expressions only\n\
             - Statement separators (;) are rejected\n\n\
             QUERY GUIDELINES:\n\
             - Filter by project, status, assignee, issuetype\n\
             - Request extra fields through params.fields\n\
             - Use ORDER BY created DESC for recent issues"
        }
    }
}

pub fn fallback_prompt() -> &'static str {
    "If the response is not valid JSON or does not follow the action schema:\n\n\
     1. Try to extract a query from the response\n\
     2. If no valid query is found, ask the user to rephrase\n\
     3. Suggest reading the schema resource to see what is available"
}

/// Document served by `prompts://<name>`.
pub fn prompt_document(name: &str, kind: DataSourceKind, max_limit: usize) -> Value {
    let (question, args) = example_args(kind);
    json!({
        "data_source": name,
        "type": kind,
        "action_schema": action_schema(name, max_limit),
        "domain_rules": domain_rules(kind),
        "fallback_prompt": fallback_prompt(),
        "examples": [
            {
                "question": question,
                "expected_action": {"action": "call_tool", "tool": tool_name(name), "args": args}
            },
            {
                "question": "What data is available?",
                "expected_action": {"action": "read_resource", "uri": schema_uri(name)}
            }
        ]
    })
}

/// Tool-aware prompt asking an LLM to pick an MCP action for `question`.
pub fn tool_prompt(
    question: &str,
    tools: &[(String, String)],
    resources: &[(String, String)],
    schema_text: Option<&str>,
) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|(name, description)| format!("- {}: {}", name, description))
        .collect();
    let resource_lines: Vec<String> = resources
        .iter()
        .map(|(uri, description)| format!("- {}: {}", uri, description))
        .collect();
    let schema = schema_text
        .map(|s| s.chars().take(SCHEMA_PROMPT_BUDGET).collect::<String>())
        .unwrap_or_else(|| "Schema not available".to_string());

    format!(
        "You are a data assistant that can query data sources and read schema information via MCP.\n\n\
         AVAILABLE TOOLS:\n{tools}\n\n\
         AVAILABLE RESOURCES:\n{resources}\n\n\
         SCHEMA:\n{schema}\n\n\
         USER QUESTION: {question}\n\n\
         RULES:\n\
         - Only read operations are allowed.\n\
         - To fetch data, call the matching query_<source> tool.\n\
         - If the user asks about structure, read the <source>://schema resource.\n\n\
         OUTPUT FORMAT:\n\
         Respond with a single-line minified JSON object:\n\
         {{\"action\": \"call_tool\", \"tool\": \"tool_name\", \"args\": {{...}}}}\n\
         or {{\"action\": \"read_resource\", \"uri\": \"resource_uri\"}}\n\n\
         IMPORTANT: Return ONLY the JSON object. No explanations, no markdown.",
        tools = tool_lines.join("\n"),
        resources = resource_lines.join("\n"),
    )
}

/// Prompt asking an LLM for one SQL SELECT answering `question`.
pub fn sql_prompt(question: &str, schema_text: &str, limit: usize) -> String {
    let schema: String = schema_text.chars().take(SCHEMA_PROMPT_BUDGET).collect();
    format!(
        "You translate questions into a single read-only SQL SELECT statement.\n\n\
         SCHEMA:\n{schema}\n\n\
         QUESTION: {question}\n\n\
         Return only the SQL, without explanation. Use at most LIMIT {limit}."
    )
}
