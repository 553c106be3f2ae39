use std::collections::HashMap;

use serde::Deserialize;

/// HTTP method a descriptor issues requests with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// A request body is only attached for methods that admit one (§4.2 step 3).
    pub fn admits_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

/// Where a named parameter is routed when building the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
}

/// Authentication hint attached to a descriptor (§3, §6), sourced from the
/// OpenAPI compiler's `x-auth-type`/`x-*-header` extensions. The executor
/// only forwards the fields the Credential Store's `apply` actually
/// consults; the rest are retained for diagnostics/logging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolAuthHint {
    pub auth_type: Option<String>,
    pub bearer_header: Option<String>,
    pub api_key_header: Option<String>,
    pub oauth2_token_url: Option<String>,
    pub oauth2_scope: Option<String>,
    pub custom_headers: Option<HashMap<String, String>>,
}

impl ToolAuthHint {
    pub fn to_auth_hint(&self) -> tb_auth::AuthHint {
        tb_auth::AuthHint {
            api_key_header: self.api_key_header.clone(),
        }
    }
}

/// An immutable tool descriptor (§3): name, method, URL template, and
/// parameter routing. Produced externally by an OpenAPI tool compiler — this
/// crate only defines the shape and accepts a pre-built table at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub method: HttpMethod,
    pub url_template: String,
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub auth_hint: Option<ToolAuthHint>,
}

impl ToolDescriptor {
    pub fn path_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.location == ParamLocation::Path)
    }

    pub fn query_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.location == ParamLocation::Query)
    }

    pub fn body_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.location == ParamLocation::Body)
    }

    /// A minimal JSON Schema object built from the parameter list, for
    /// advertising this tool's call shape to the model (§6). The compiler's
    /// own OpenAPI-derived schema, if richer, is expected to flow through
    /// here in a future revision of the descriptor shape; for now every
    /// parameter is typed as a string, which is sufficient for path/query
    /// routing and is coerced back from the model's JSON output regardless.
    pub fn input_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(param.name.clone(), serde_json::json!({ "type": "string" }));
            if param.required {
                required.push(param.name.clone());
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Immutable, name-indexed descriptor table (§4.2 step 1, §6 collaborator
/// contract). Shared read-only across all sessions.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    by_name: HashMap<String, ToolDescriptor>,
}

impl DescriptorTable {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        Self {
            by_name: descriptors.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All descriptors, in no particular order — used to advertise the
    /// available tool set to the model (§6).
    pub fn all(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.by_name.values()
    }
}
