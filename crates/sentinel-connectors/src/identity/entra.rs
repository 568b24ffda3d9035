//! Entra ID identity connector — users, groups, directory roles,
//! conditional access.
//!
//! Deeper identity coverage than the Azure cloud connector: MFA status
//! per user, conditional-access policies, and membership edges. Talks to
//! the Microsoft Graph REST API behind [`EntraApi`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use sentinel_core::types::{
    EdgeProperties, EdgeType, Group, IdentitySource, NodeId, Policy, PolicyType, Role, User,
    UserType,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::base::{make_edge, Connector, SyncResult};
use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;
use crate::http::{client_credentials_token, RestClient};
use crate::retry::{with_retry, RateLimiter};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

// ── Source models ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EntraUser {
    pub object_id: String,
    pub user_principal_name: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    pub account_enabled: bool,
    /// None when the authentication-methods call was not permitted.
    pub mfa_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct EntraGroup {
    pub object_id: String,
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntraRole {
    pub object_id: String,
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntraCaPolicy {
    pub display_name: String,
    pub state: String,
    pub conditions_json: Option<String>,
}

/// Narrow seam over Microsoft Graph.
#[async_trait]
pub trait EntraApi: Send + Sync {
    async fn organization_name(&self) -> Result<String, SentinelError>;
    async fn list_users(&self) -> Result<Vec<EntraUser>, SentinelError>;
    async fn list_groups(&self) -> Result<Vec<EntraGroup>, SentinelError>;
    /// Member object ids of one group.
    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, SentinelError>;
    async fn list_roles(&self) -> Result<Vec<EntraRole>, SentinelError>;
    /// Member object ids of one directory role.
    async fn role_members(&self, role_id: &str) -> Result<Vec<String>, SentinelError>;
    async fn list_ca_policies(&self) -> Result<Vec<EntraCaPolicy>, SentinelError>;
}

pub struct EntraConnector {
    name: String,
    config: ConnectorConfig,
    api: Arc<dyn EntraApi>,
    limiter: Arc<RateLimiter>,
}

impl EntraConnector {
    pub fn new(name: &str, config: ConnectorConfig, api: Arc<dyn EntraApi>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            name: name.to_string(),
            config,
            api,
            limiter,
        }
    }
}

#[async_trait]
impl Connector for EntraConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::EntraId
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn health_check(&self, _ctx: &ScanContext, _creds: &Secret) -> Result<(), SentinelError> {
        self.limiter.acquire().await;
        let org = with_retry(&self.config.retry, "organization:get", || {
            self.api.organization_name()
        })
        .await?;
        tracing::debug!(connector = %self.name, organization = %org, "Entra health check passed");
        Ok(())
    }

    async fn discover(
        &self,
        ctx: &ScanContext,
        _creds: &Secret,
        session: &mut EngramSession,
    ) -> Result<SyncResult, SentinelError> {
        let tenant_id = ctx.tenant_id;
        let now = ctx.now;
        let mut result = SyncResult::default();

        session.record_decision(
            "membership depth",
            &["direct members only", "transitive membership"],
            "direct members only",
            "transitive closure is derivable in the graph itself",
        );

        // Users, keyed by directory object id for membership edges.
        let mut user_nodes: HashMap<String, NodeId> = HashMap::new();
        if self.config.kind_enabled("users") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "users:list", || self.api.list_users()).await {
                Ok(users) => {
                    let count = users.len() as u64;
                    let without_mfa =
                        users.iter().filter(|u| u.mfa_enabled == Some(false)).count() as u64;
                    for u in users {
                        let mut user = User {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            username: u.user_principal_name.clone(),
                            display_name: u.display_name.clone(),
                            email: u.mail.clone(),
                            user_type: UserType::Human,
                            source: IdentitySource::EntraId,
                            enabled: u.account_enabled,
                            mfa_enabled: u.mfa_enabled,
                            last_login: None,
                            first_seen: now,
                            last_seen: now,
                        };
                        user.id =
                            NodeId::from_natural_key(&tenant_id, "User", &user.natural_key());
                        user_nodes.insert(u.object_id.clone(), user.id);
                        result.users.push(user);
                    }
                    session.record_action(
                        "list_users",
                        "graph",
                        true,
                        [("users", count), ("without_mfa", without_mfa)],
                    );
                }
                Err(e) => {
                    let error = format!("users: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "entra_id"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("groups") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "groups:list", || self.api.list_groups()).await
            {
                Ok(groups) => {
                    let count = groups.len() as u64;
                    let mut membership_edges = 0u64;
                    for g in groups {
                        ctx.check_cancelled()?;
                        let mut group = Group {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: g.display_name.clone(),
                            description: g.description.clone(),
                            source: IdentitySource::EntraId,
                            member_count: None,
                            first_seen: now,
                            last_seen: now,
                        };
                        group.id =
                            NodeId::from_natural_key(&tenant_id, "Group", &group.natural_key());

                        self.limiter.acquire().await;
                        match with_retry(&self.config.retry, "groups:members", || {
                            self.api.group_members(&g.object_id)
                        })
                        .await
                        {
                            Ok(members) => {
                                group.member_count = Some(members.len() as u32);
                                for member in members {
                                    if let Some(user_id) = user_nodes.get(&member) {
                                        membership_edges += 1;
                                        result.edges.push(make_edge(
                                            tenant_id,
                                            now,
                                            *user_id,
                                            group.id,
                                            EdgeType::MemberOf,
                                            EdgeProperties::default(),
                                        ));
                                    }
                                }
                            }
                            Err(e) => {
                                let error = format!("group {} members: {e}", g.display_name);
                                session.record_dead_end(
                                    &error,
                                    serde_json::json!({"group": g.display_name}),
                                );
                                result.errors.push(error);
                            }
                        }
                        result.groups.push(group);
                    }
                    session.record_action(
                        "list_groups",
                        "graph",
                        true,
                        [("groups", count), ("membership_edges", membership_edges)],
                    );
                }
                Err(e) => {
                    let error = format!("groups: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "entra_id"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("roles") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "roles:list", || self.api.list_roles()).await {
                Ok(roles) => {
                    let count = roles.len() as u64;
                    let mut assignment_edges = 0u64;
                    for r in roles {
                        ctx.check_cancelled()?;
                        let mut role = Role {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: r.display_name.clone(),
                            description: r.description.clone(),
                            source: IdentitySource::EntraId,
                            permissions: vec![],
                            first_seen: now,
                            last_seen: now,
                        };
                        role.id =
                            NodeId::from_natural_key(&tenant_id, "Role", &role.natural_key());

                        self.limiter.acquire().await;
                        match with_retry(&self.config.retry, "roles:members", || {
                            self.api.role_members(&r.object_id)
                        })
                        .await
                        {
                            Ok(members) => {
                                for member in members {
                                    if let Some(user_id) = user_nodes.get(&member) {
                                        assignment_edges += 1;
                                        result.edges.push(make_edge(
                                            tenant_id,
                                            now,
                                            *user_id,
                                            role.id,
                                            EdgeType::HasAccess,
                                            EdgeProperties::default(),
                                        ));
                                    }
                                }
                            }
                            Err(e) => {
                                let error = format!("role {} members: {e}", r.display_name);
                                session.record_dead_end(
                                    &error,
                                    serde_json::json!({"role": r.display_name}),
                                );
                                result.errors.push(error);
                            }
                        }
                        result.roles.push(role);
                    }
                    session.record_action(
                        "list_roles",
                        "graph",
                        true,
                        [("roles", count), ("assignment_edges", assignment_edges)],
                    );
                }
                Err(e) => {
                    let error = format!("roles: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "entra_id"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("conditional_access") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "ca:list", || self.api.list_ca_policies())
                .await
            {
                Ok(policies) => {
                    let count = policies.len() as u64;
                    for p in policies {
                        let mut policy = Policy {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: p.display_name.clone(),
                            policy_type: PolicyType::ConditionalAccess,
                            source: "entra_id".to_string(),
                            rules_json: p.conditions_json.clone(),
                            first_seen: now,
                            last_seen: now,
                        };
                        policy.id =
                            NodeId::from_natural_key(&tenant_id, "Policy", &policy.natural_key());
                        result.policies.push(policy);
                    }
                    session.record_action(
                        "list_conditional_access",
                        "graph",
                        true,
                        [("policies", count)],
                    );
                }
                Err(e) => {
                    let error = format!("conditional_access: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "entra_id"}));
                    result.errors.push(error);
                }
            }
        }

        Ok(result)
    }
}

// ── HTTP transport ────────────────────────────────────────────────

mod graph {
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
    pub struct Collection<T> {
        #[serde(default)]
        pub value: Vec<T>,
    }

    #[derive(Deserialize)]
    pub struct Organization {
        #[serde(rename = "displayName", default)]
        pub display_name: String,
    }

    #[derive(Deserialize)]
    pub struct User {
        #[serde(default)]
        pub id: String,
        #[serde(rename = "userPrincipalName", default)]
        pub user_principal_name: String,
        #[serde(rename = "displayName", default)]
        pub display_name: Option<String>,
        #[serde(default)]
        pub mail: Option<String>,
        #[serde(rename = "accountEnabled", default)]
        pub account_enabled: bool,
    }

    #[derive(Deserialize)]
    pub struct Group {
        #[serde(default)]
        pub id: String,
        #[serde(rename = "displayName", default)]
        pub display_name: String,
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct DirectoryRole {
        #[serde(default)]
        pub id: String,
        #[serde(rename = "displayName", default)]
        pub display_name: String,
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct DirectoryObject {
        #[serde(default)]
        pub id: String,
    }

    #[derive(Deserialize)]
    pub struct CaPolicy {
        #[serde(rename = "displayName", default)]
        pub display_name: String,
        #[serde(default)]
        pub state: String,
        #[serde(default)]
        pub conditions: serde_json::Value,
    }

    #[derive(Deserialize)]
    pub struct AuthMethod {
        #[serde(rename = "@odata.type", default)]
        pub odata_type: String,
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Microsoft Graph transport with client-credentials auth.
pub struct HttpEntraApi {
    rest: RestClient,
    directory_tenant: String,
    client_id: String,
    client_secret: crate::credentials::SecretString,
    token: Mutex<Option<CachedToken>>,
    /// Authentication-methods reads need extra consent; off by default.
    check_mfa: bool,
}

impl HttpEntraApi {
    /// Build from a resolved secret bundle: `directory_tenant_id`,
    /// `client_id`, `client_secret`.
    pub fn from_secret(secret: &Secret, check_mfa: bool) -> Result<Self, SentinelError> {
        Ok(Self {
            rest: RestClient::new("entra_id")?,
            directory_tenant: secret
                .require("entra_id", "directory_tenant_id")?
                .expose()
                .to_string(),
            client_id: secret.require("entra_id", "client_id")?.expose().to_string(),
            client_secret: secret.require("entra_id", "client_secret")?.clone(),
            token: Mutex::new(None),
            check_mfa,
        })
    }

    async fn bearer(&self) -> Result<String, SentinelError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if t.expires_at > Instant::now() {
                return Ok(t.token.clone());
            }
        }

        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.directory_tenant
        );
        let response = client_credentials_token(
            &self.rest,
            &token_url,
            &self.client_id,
            self.client_secret.expose(),
            GRAPH_SCOPE,
        )
        .await?;

        let ttl = response.expires_in.unwrap_or(3600).saturating_sub(60);
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(response.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SentinelError> {
        let token = self.bearer().await?;
        let auth = format!("Bearer {token}");
        self.rest
            .get_json(
                &format!("{GRAPH_BASE}{path}"),
                &[],
                &[("Authorization", auth.as_str())],
            )
            .await
    }

    async fn user_mfa(&self, user_id: &str) -> Option<bool> {
        let methods: Result<graph::Collection<graph::AuthMethod>, _> = self
            .get(&format!("/users/{user_id}/authentication/methods"))
            .await;
        match methods {
            // Password plus anything else counts as MFA-capable.
            Ok(methods) => Some(methods.value.len() > 1),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl EntraApi for HttpEntraApi {
    async fn organization_name(&self) -> Result<String, SentinelError> {
        let orgs: graph::Collection<graph::Organization> = self.get("/organization").await?;
        Ok(orgs
            .value
            .into_iter()
            .next()
            .map(|o| o.display_name)
            .unwrap_or_default())
    }

    async fn list_users(&self) -> Result<Vec<EntraUser>, SentinelError> {
        let users: graph::Collection<graph::User> = self.get("/users").await?;
        let mut out = Vec::with_capacity(users.value.len());
        for u in users.value {
            let mfa_enabled = if self.check_mfa {
                self.user_mfa(&u.id).await
            } else {
                None
            };
            out.push(EntraUser {
                object_id: u.id,
                user_principal_name: u.user_principal_name,
                display_name: u.display_name,
                mail: u.mail,
                account_enabled: u.account_enabled,
                mfa_enabled,
            });
        }
        Ok(out)
    }

    async fn list_groups(&self) -> Result<Vec<EntraGroup>, SentinelError> {
        let groups: graph::Collection<graph::Group> = self.get("/groups").await?;
        Ok(groups
            .value
            .into_iter()
            .map(|g| EntraGroup {
                object_id: g.id,
                display_name: g.display_name,
                description: g.description,
            })
            .collect())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, SentinelError> {
        let members: graph::Collection<graph::DirectoryObject> =
            self.get(&format!("/groups/{group_id}/members")).await?;
        Ok(members.value.into_iter().map(|m| m.id).collect())
    }

    async fn list_roles(&self) -> Result<Vec<EntraRole>, SentinelError> {
        let roles: graph::Collection<graph::DirectoryRole> =
            self.get("/directoryRoles").await?;
        Ok(roles
            .value
            .into_iter()
            .map(|r| EntraRole {
                object_id: r.id,
                display_name: r.display_name,
                description: r.description,
            })
            .collect())
    }

    async fn role_members(&self, role_id: &str) -> Result<Vec<String>, SentinelError> {
        let members: graph::Collection<graph::DirectoryObject> = self
            .get(&format!("/directoryRoles/{role_id}/members"))
            .await?;
        Ok(members.value.into_iter().map(|m| m.id).collect())
    }

    async fn list_ca_policies(&self) -> Result<Vec<EntraCaPolicy>, SentinelError> {
        let policies: graph::Collection<graph::CaPolicy> =
            self.get("/identity/conditionalAccess/policies").await?;
        Ok(policies
            .value
            .into_iter()
            .map(|p| EntraCaPolicy {
                display_name: p.display_name,
                state: p.state,
                conditions_json: serde_json::to_string(&p.conditions).ok(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::types::TenantId;

    pub(crate) struct FakeEntraApi {
        pub alice_in_eng: bool,
    }

    #[async_trait]
    impl EntraApi for FakeEntraApi {
        async fn organization_name(&self) -> Result<String, SentinelError> {
            Ok("Contoso".to_string())
        }

        async fn list_users(&self) -> Result<Vec<EntraUser>, SentinelError> {
            Ok(vec![
                EntraUser {
                    object_id: "u-alice".to_string(),
                    user_principal_name: "alice@contoso.com".to_string(),
                    display_name: Some("Alice".to_string()),
                    mail: Some("alice@contoso.com".to_string()),
                    account_enabled: true,
                    mfa_enabled: Some(true),
                },
                EntraUser {
                    object_id: "u-bob".to_string(),
                    user_principal_name: "bob@contoso.com".to_string(),
                    display_name: Some("Bob".to_string()),
                    mail: None,
                    account_enabled: true,
                    mfa_enabled: Some(false),
                },
            ])
        }

        async fn list_groups(&self) -> Result<Vec<EntraGroup>, SentinelError> {
            Ok(vec![EntraGroup {
                object_id: "g-eng".to_string(),
                display_name: "eng".to_string(),
                description: None,
            }])
        }

        async fn group_members(&self, group_id: &str) -> Result<Vec<String>, SentinelError> {
            assert_eq!(group_id, "g-eng");
            if self.alice_in_eng {
                Ok(vec!["u-alice".to_string()])
            } else {
                Ok(vec![])
            }
        }

        async fn list_roles(&self) -> Result<Vec<EntraRole>, SentinelError> {
            Ok(vec![EntraRole {
                object_id: "r-admin".to_string(),
                display_name: "Global Administrator".to_string(),
                description: None,
            }])
        }

        async fn role_members(&self, _role_id: &str) -> Result<Vec<String>, SentinelError> {
            Ok(vec!["u-bob".to_string()])
        }

        async fn list_ca_policies(&self) -> Result<Vec<EntraCaPolicy>, SentinelError> {
            Ok(vec![EntraCaPolicy {
                display_name: "Require MFA".to_string(),
                state: "enabled".to_string(),
                conditions_json: None,
            }])
        }
    }

    #[tokio::test]
    async fn discovers_identities_with_membership_edges() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let connector = EntraConnector::new(
            "entra-test",
            ConnectorConfig::default(),
            Arc::new(FakeEntraApi { alice_in_eng: true }),
        );
        let mut session = EngramSession::open(
            tenant.0,
            "connector/entra-test",
            "test",
            serde_json::Value::Null,
        );

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        assert_eq!(result.users.len(), 2);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.roles.len(), 1);
        assert_eq!(result.policies.len(), 1);

        let alice_id =
            NodeId::from_natural_key(&tenant, "User", "user:entra_id:alice@contoso.com");
        let eng_id = NodeId::from_natural_key(&tenant, "Group", "group:entra_id:eng");
        assert!(result.edges.iter().any(|e| {
            e.edge_type == EdgeType::MemberOf && e.source_id == alice_id && e.target_id == eng_id
        }));

        // Bob holds the directory role.
        let bob_id = NodeId::from_natural_key(&tenant, "User", "user:entra_id:bob@contoso.com");
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::HasAccess && e.source_id == bob_id));

        // MFA status propagates.
        let bob = result
            .users
            .iter()
            .find(|u| u.username == "bob@contoso.com")
            .unwrap();
        assert_eq!(bob.mfa_enabled, Some(false));
        drop(session);
    }

    #[tokio::test]
    async fn removed_membership_drops_the_edge_from_the_batch() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let connector = EntraConnector::new(
            "entra-test",
            ConnectorConfig::default(),
            Arc::new(FakeEntraApi { alice_in_eng: false }),
        );
        let mut session = EngramSession::open(
            tenant.0,
            "connector/entra-test",
            "test",
            serde_json::Value::Null,
        );

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        assert!(result
            .edges
            .iter()
            .all(|e| e.edge_type != EdgeType::MemberOf));
        drop(session);
    }
}
