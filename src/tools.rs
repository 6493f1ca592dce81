use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::db::{Database, EnrichmentUpdate};
use crate::error::ToolError;
use crate::insights::{InsightGenerator, SenderContext};
use crate::models::{Company, CompanyDraft, Employee};

const SUGGESTION_THRESHOLD: f64 = 0.85;

static LEADERSHIP_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(ceo|cto|cfo|coo|cmo|chief|co-?founder|founder|president|vp|vice president|head|director|owner)\b",
    )
    .expect("leadership title pattern is valid")
});

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResponse {
    fn text(text: String, is_error: bool) -> Self {
        Self { content: vec![ContentBlock { kind: "text".to_string(), text }], is_error }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    let name_only = json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    });
    let outreach = json!({
        "type": "object",
        "properties": {
            "company_name": { "type": "string" },
            "my_company": { "type": "string" },
            "my_product": { "type": "string" },
            "goal": { "type": "string" }
        },
        "required": ["company_name", "my_company"]
    });

    vec![
        ToolDefinition {
            name: "add_company",
            description: "Add a company or update the fields given; employees are merged by name",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "industry": { "type": "string" },
                    "context": { "type": "string" },
                    "employees": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "title": { "type": "string" },
                                "linkedin": { "type": "string" }
                            },
                            "required": ["name"]
                        }
                    }
                },
                "required": ["name"]
            }),
        },
        ToolDefinition {
            name: "get_company",
            description: "Fetch one company by name (case-insensitive)",
            input_schema: name_only.clone(),
        },
        ToolDefinition {
            name: "list_companies",
            description: "List every company in the registry",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "search_companies",
            description: "Substring search over name, description, industry and employee names",
            input_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "delete_company",
            description: "Delete a company and its employees",
            input_schema: name_only.clone(),
        },
        ToolDefinition {
            name: "enrich_company",
            description: "Research a company and store description, industry and recent activity",
            input_schema: name_only,
        },
        ToolDefinition {
            name: "generate_strategy",
            description: "Communication strategy for approaching a company",
            input_schema: outreach.clone(),
        },
        ToolDefinition {
            name: "draft_email",
            description: "Draft a first-touch email, addressed to the company's most senior known contact",
            input_schema: outreach,
        },
    ]
}

#[derive(Debug, Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct OutreachArgs {
    #[serde(alias = "name")]
    company_name: String,
    my_company: String,
    #[serde(default)]
    my_product: Option<String>,
    #[serde(default)]
    goal: Option<String>,
}

impl OutreachArgs {
    fn sender(&self) -> SenderContext {
        SenderContext {
            my_company: self.my_company.clone(),
            my_product: self.my_product.clone(),
            goal: self.goal.clone(),
        }
    }
}

/// Named-operation router over the company registry.
pub struct ToolDispatcher<'a> {
    db: &'a Database,
    insights: Option<&'a dyn InsightGenerator>,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(db: &'a Database, insights: Option<&'a dyn InsightGenerator>) -> Self {
        Self { db, insights }
    }

    /// Run one call. Never fails: every error, including an unknown tool
    /// name, comes back as an `isError` response.
    pub fn dispatch(&self, call: &ToolCall) -> ToolResponse {
        info!(tool = %call.name, "Tool call");
        match self.execute(&call.name, &call.arguments) {
            Ok(value) => ToolResponse::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
                false,
            ),
            Err(err) => {
                warn!(tool = %call.name, kind = err.kind(), error = %err, "Tool call failed");
                let mut body = json!({ "error": { "kind": err.kind(), "message": err.to_string() } });
                if let ToolError::NotFound { suggestions, .. } = &err {
                    if !suggestions.is_empty() {
                        body["error"]["suggestions"] = json!(suggestions);
                    }
                }
                ToolResponse::text(body.to_string(), true)
            }
        }
    }

    fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "add_company" => {
                let draft: CompanyDraft = parse_args(args)?;
                if draft.name.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("name must not be empty".to_string()));
                }
                to_value(&self.db.add_company(&draft)?)
            }
            "get_company" => {
                let NameArgs { name } = parse_args(args)?;
                to_value(&self.require_company(&name)?)
            }
            "list_companies" => to_value(&self.db.list_companies()?),
            "search_companies" => {
                let SearchArgs { query } = parse_args(args)?;
                if query.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
                }
                to_value(&self.db.search_companies(&query)?)
            }
            "delete_company" => {
                let NameArgs { name } = parse_args(args)?;
                if !self.db.delete_company(&name)? {
                    return Err(self.not_found(&name));
                }
                Ok(json!({ "deleted": name }))
            }
            "enrich_company" => {
                let NameArgs { name } = parse_args(args)?;
                let company = self.require_company(&name)?;
                let insight = self.insights()?.company_insights(&company)?;
                let update = EnrichmentUpdate {
                    description: insight.description,
                    industry: insight.industry,
                    recent_activity: insight.recent_activity,
                };
                let enriched = self
                    .db
                    .record_enrichment(&company.name, &update)?
                    .ok_or_else(|| self.not_found(&name))?;
                to_value(&enriched)
            }
            "generate_strategy" => {
                let args: OutreachArgs = parse_args(args)?;
                let company = self.require_company(&args.company_name)?;
                to_value(&self.insights()?.strategy(&company, &args.sender())?)
            }
            "draft_email" => {
                let args: OutreachArgs = parse_args(args)?;
                let company = self.require_company(&args.company_name)?;
                let recipient = pick_recipient(&company.employees);
                to_value(&self.insights()?.email(&company, recipient, &args.sender())?)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    fn insights(&self) -> Result<&'a dyn InsightGenerator, ToolError> {
        self.insights
            .ok_or_else(|| ToolError::Upstream("No insight generator configured (check the model settings)".to_string()))
    }

    fn require_company(&self, name: &str) -> Result<Company, ToolError> {
        self.db.get_company(name)?.ok_or_else(|| self.not_found(name))
    }

    fn not_found(&self, name: &str) -> ToolError {
        let suggestions = self
            .db
            .company_names()
            .map(|names| similar_names(name, &names))
            .unwrap_or_default();
        ToolError::NotFound { entity: "Company", key: name.to_string(), suggestions }
    }
}

fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    Ok(serde_json::from_value(args)?)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Upstream(e.to_string()))
}

/// Most senior-looking employee by title, else the first one listed.
pub fn pick_recipient(employees: &[Employee]) -> Option<&Employee> {
    employees
        .iter()
        .find(|e| e.title.as_deref().is_some_and(|t| LEADERSHIP_TITLE.is_match(t)))
        .or_else(|| employees.first())
}

fn similar_names(query: &str, names: &[String]) -> Vec<String> {
    let query = query.trim().to_lowercase();
    let mut scored: Vec<(f64, &String)> = names
        .iter()
        .map(|n| (strsim::jaro_winkler(&query, &n.to_lowercase()), n))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(3).map(|(_, n)| n.clone()).collect()
}
