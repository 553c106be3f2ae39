pub mod descriptor;
pub mod executor;
pub mod http_client;

pub use descriptor::{DescriptorTable, HttpMethod, ParamLocation, ParamSpec, ToolAuthHint, ToolDescriptor};
pub use executor::{ToolExecutor, ToolResult, ToolUseRequest};
pub use http_client::ToolHttpClient;

#[cfg(test)]
mod tests {
    use super::*;
    use tb_auth::CredentialStore;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "get_users".to_string(),
            method: HttpMethod::Get,
            url_template: "/api/v1/users/{id}".to_string(),
            params: vec![ParamSpec {
                name: "id".to_string(),
                location: ParamLocation::Path,
                required: true,
            }],
            auth_hint: None,
        }
    }

    #[tokio::test]
    async fn unknown_tool_name_yields_error_result() {
        let table = DescriptorTable::new(vec![descriptor()]);
        let http = ToolHttpClient::new(
            reqwest::Client::new(),
            vec![],
            vec![],
            std::time::Duration::from_secs(5),
            1024 * 1024,
        );
        let executor = ToolExecutor::new(table, http, Some("https://example.com".to_string()));
        let credentials = CredentialStore::new(reqwest::Client::new(), vec![]);

        let result = executor
            .execute_one(
                &credentials,
                &ToolUseRequest {
                    id: "call-1".to_string(),
                    name: "does_not_exist".to_string(),
                    input: serde_json::json!({}),
                },
            )
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn missing_required_param_yields_error_result() {
        let table = DescriptorTable::new(vec![descriptor()]);
        let http = ToolHttpClient::new(
            reqwest::Client::new(),
            vec![],
            vec![],
            std::time::Duration::from_secs(5),
            1024 * 1024,
        );
        let executor = ToolExecutor::new(table, http, Some("https://example.com".to_string()));
        let credentials = CredentialStore::new(reqwest::Client::new(), vec![]);

        let result = executor
            .execute_one(
                &credentials,
                &ToolUseRequest {
                    id: "call-1".to_string(),
                    name: "get_users".to_string(),
                    input: serde_json::json!({}),
                },
            )
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("missing required parameter"));
    }

    #[tokio::test]
    async fn execute_many_preserves_input_order() {
        let table = DescriptorTable::new(vec![]);
        let http = ToolHttpClient::new(
            reqwest::Client::new(),
            vec![],
            vec![],
            std::time::Duration::from_secs(5),
            1024,
        );
        let executor = ToolExecutor::new(table, http, None);
        let credentials = CredentialStore::new(reqwest::Client::new(), vec![]);

        let requests: Vec<ToolUseRequest> = (0..5)
            .map(|i| ToolUseRequest {
                id: format!("call-{}", i),
                name: "missing".to_string(),
                input: serde_json::json!({}),
            })
            .collect();

        let results = executor.execute_many(&credentials, &requests, 3).await;
        let ids: Vec<&str> = results.iter().map(|r| r.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["call-0", "call-1", "call-2", "call-3", "call-4"]);
    }
}
