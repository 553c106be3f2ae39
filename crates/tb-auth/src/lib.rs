pub mod credentials;
pub mod oauth;
pub mod store;

pub use credentials::{Credentials, OAuthTokenCache};
pub use store::{AuthHint, CredentialStore};

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    #[tokio::test]
    async fn bearer_token_sets_authorization_header() {
        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        store
            .set(Credentials::BearerToken {
                token: "T".to_string(),
            })
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        store.apply(&mut headers, None).await.unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer T");
    }

    #[tokio::test]
    async fn basic_auth_encodes_user_pass() {
        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        store
            .set(Credentials::BasicAuth {
                user: "user".to_string(),
                pass: "pass".to_string(),
            })
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        store.apply(&mut headers, None).await.unwrap();
        // base64("user:pass") == "dXNlcjpwYXNz"
        assert_eq!(headers.get("authorization").unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[tokio::test]
    async fn api_key_defaults_to_x_api_key_header() {
        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        store
            .set(Credentials::ApiKey {
                value: "secret".to_string(),
                header_name: None,
            })
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        store.apply(&mut headers, None).await.unwrap();
        assert_eq!(headers.get("X-API-Key").unwrap(), "secret");
    }

    #[tokio::test]
    async fn api_key_credential_header_name_wins_over_hint() {
        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        store
            .set(Credentials::ApiKey {
                value: "secret".to_string(),
                header_name: Some("X-Credential-Header".to_string()),
            })
            .await
            .unwrap();

        let hint = AuthHint {
            api_key_header: Some("X-Hint-Header".to_string()),
        };
        let mut headers = HeaderMap::new();
        store.apply(&mut headers, Some(&hint)).await.unwrap();
        assert_eq!(headers.get("X-Credential-Header").unwrap(), "secret");
        assert!(headers.get("X-Hint-Header").is_none());
    }

    #[tokio::test]
    async fn custom_headers_never_overwrite_existing() {
        let mut custom = std::collections::HashMap::new();
        custom.insert("X-Custom".to_string(), "new".to_string());

        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        store.set(Credentials::Custom { headers: custom }).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("X-Custom", "existing".parse().unwrap());
        store.apply(&mut headers, None).await.unwrap();
        assert_eq!(headers.get("X-Custom").unwrap(), "existing");
    }

    #[tokio::test]
    async fn logout_clears_credentials() {
        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        store
            .set(Credentials::BearerToken {
                token: "T".to_string(),
            })
            .await
            .unwrap();
        store.clear().await;

        let mut headers = HeaderMap::new();
        store.apply(&mut headers, None).await.unwrap();
        assert!(headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn set_rejects_auth_type_outside_allow_list() {
        let store = CredentialStore::new(reqwest::Client::new(), vec!["bearer_token".to_string()]);
        let result = store
            .set(Credentials::BasicAuth {
                user: "u".to_string(),
                pass: "p".to_string(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn set_rejects_empty_required_field() {
        let store = CredentialStore::new(reqwest::Client::new(), vec![]);
        let result = store
            .set(Credentials::BearerToken {
                token: "".to_string(),
            })
            .await;
        assert!(result.is_err());
    }
}
