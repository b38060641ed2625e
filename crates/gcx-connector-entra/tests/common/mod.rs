//! Common test utilities for gcx-connector-entra integration tests.

#![cfg(feature = "integration")]
#![allow(dead_code)]

use std::sync::Arc;

use gcx_connector_entra::{
    EntraConfig, EntraCredentials, EntraDirectory, GraphClient, RateLimitConfig, TokenCache,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT_ID: &str = "test-tenant";

/// A user as returned by a membership query.
pub fn create_member(id: &str, created: Option<&str>) -> Value {
    json!({
        "@odata.type": "#microsoft.graph.user",
        "id": id,
        "displayName": format!("User {id}"),
        "createdDateTime": created
    })
}

/// A SharePoint list item of the synced-department list.
pub fn create_department_item(
    id: &str,
    abbreviation: &str,
    code: &str,
    last_sync: Option<&str>,
) -> Value {
    let mut fields = json!({
        "@odata.etag": "\"1\"",
        "Abbreviation": abbreviation,
        "RGCode": code
    });
    if let Some(date) = last_sync {
        fields["LastSyncDate"] = json!(date);
    }
    json!({ "id": id, "fields": fields })
}

/// Wraps items in an OData response format.
pub fn create_odata_response(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["@odata.nextLink"] = json!(link);
    }
    response
}

/// Creates an OData error response.
pub fn create_odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// Creates a mock OAuth token response.
pub fn create_token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Mock server standing in for both the authority and Graph.
pub struct MockGraphServer {
    pub server: MockServer,
}

impl MockGraphServer {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Connection settings pointing at this server, with millisecond backoff.
    pub fn config(&self) -> EntraConfig {
        EntraConfig::builder()
            .tenant_id(TENANT_ID)
            .graph_endpoint(self.url())
            .login_endpoint(self.url())
            .page_size(100)
            .rate_limit(RateLimitConfig::for_testing())
            .build()
            .expect("valid test config")
    }

    pub fn client_with(&self, credentials: EntraCredentials) -> Arc<GraphClient> {
        let config = self.config();
        let tokens = Arc::new(TokenCache::new(&config, credentials));
        Arc::new(GraphClient::new(&config, tokens).expect("graph client"))
    }

    pub fn client(&self) -> Arc<GraphClient> {
        self.client_with(EntraCredentials::app(
            "client-id",
            "client-secret".to_string().into(),
        ))
    }

    pub fn directory(&self) -> EntraDirectory {
        let client = self.client();
        EntraDirectory::new(client.clone(), client, 100)
    }

    /// Sets up the OAuth token endpoint.
    pub async fn mock_token_endpoint(&self) {
        Mock::given(method("POST"))
            .and(path(format!("/{TENANT_ID}/oauth2/v2.0/token")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_token_response("mock-access-token", 3600)),
            )
            .mount(&self.server)
            .await;
    }

    /// Serves `$count` for a group.
    pub async fn mock_member_count(&self, group_id: &str, count: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/v1.0/groups/{group_id}/members/$count")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string(count.to_string()),
            )
            .mount(&self.server)
            .await;
    }

    /// Accepts every membership patch against a group.
    pub async fn mock_add_members(&self, group_id: &str) {
        Mock::given(method("PATCH"))
            .and(path(format!("/v1.0/groups/{group_id}")))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    /// `directoryObjects` reference as Graph expects it in a bind.
    pub fn object_ref(&self, id: &str) -> String {
        format!("{}/v1.0/directoryObjects/{id}", self.url())
    }
}
