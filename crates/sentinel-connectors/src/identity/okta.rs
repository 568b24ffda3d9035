//! Okta identity connector — users, groups, apps, sign-on policies.
//!
//! Okta's API is plain JSON with SSWS token auth; [`HttpOktaApi`]
//! implements the [`OktaApi`] seam directly over REST.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use sentinel_core::types::{
    AppType, Application, EdgeProperties, EdgeType, Group, IdentitySource, NodeId, Policy,
    PolicyType, User, UserType,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::base::{make_edge, Connector, SyncResult};
use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;
use crate::http::RestClient;
use crate::retry::{with_retry, RateLimiter};

// ── Source models ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OktaUser {
    pub okta_id: String,
    pub login: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub active: bool,
    pub mfa_enrolled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct OktaGroup {
    pub okta_id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OktaApp {
    pub okta_id: String,
    pub label: String,
    pub active: bool,
    /// Okta ids of users assigned to the app.
    pub assigned_user_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OktaPolicy {
    pub name: String,
    pub policy_type: String,
    pub rules_json: Option<String>,
}

/// Narrow seam over the Okta REST API.
#[async_trait]
pub trait OktaApi: Send + Sync {
    async fn org_name(&self) -> Result<String, SentinelError>;
    async fn list_users(&self) -> Result<Vec<OktaUser>, SentinelError>;
    async fn list_groups(&self) -> Result<Vec<OktaGroup>, SentinelError>;
    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, SentinelError>;
    async fn list_apps(&self) -> Result<Vec<OktaApp>, SentinelError>;
    async fn list_policies(&self) -> Result<Vec<OktaPolicy>, SentinelError>;
}

pub struct OktaConnector {
    name: String,
    config: ConnectorConfig,
    api: Arc<dyn OktaApi>,
    limiter: Arc<RateLimiter>,
}

impl OktaConnector {
    pub fn new(name: &str, config: ConnectorConfig, api: Arc<dyn OktaApi>) -> Self {
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
impl Connector for OktaConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Okta
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn health_check(&self, _ctx: &ScanContext, _creds: &Secret) -> Result<(), SentinelError> {
        self.limiter.acquire().await;
        let org = with_retry(&self.config.retry, "org:get", || self.api.org_name()).await?;
        tracing::debug!(connector = %self.name, org = %org, "Okta health check passed");
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

        let mut user_nodes: HashMap<String, NodeId> = HashMap::new();
        if self.config.kind_enabled("users") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "users:list", || self.api.list_users()).await {
                Ok(users) => {
                    let count = users.len() as u64;
                    for u in users {
                        let mut user = User {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            username: u.login.clone(),
                            display_name: u.display_name.clone(),
                            email: u.email.clone(),
                            user_type: UserType::Human,
                            source: IdentitySource::Okta,
                            enabled: u.active,
                            mfa_enabled: u.mfa_enrolled,
                            last_login: None,
                            first_seen: now,
                            last_seen: now,
                        };
                        user.id =
                            NodeId::from_natural_key(&tenant_id, "User", &user.natural_key());
                        user_nodes.insert(u.okta_id.clone(), user.id);
                        result.users.push(user);
                    }
                    session.record_action("list_users", "okta", true, [("users", count)]);
                }
                Err(e) => {
                    let error = format!("users: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "okta"}));
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
                            name: g.name.clone(),
                            description: g.description.clone(),
                            source: IdentitySource::Okta,
                            member_count: None,
                            first_seen: now,
                            last_seen: now,
                        };
                        group.id =
                            NodeId::from_natural_key(&tenant_id, "Group", &group.natural_key());

                        self.limiter.acquire().await;
                        match with_retry(&self.config.retry, "groups:members", || {
                            self.api.group_members(&g.okta_id)
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
                                let error = format!("group {} members: {e}", g.name);
                                session
                                    .record_dead_end(&error, serde_json::json!({"group": g.name}));
                                result.errors.push(error);
                            }
                        }
                        result.groups.push(group);
                    }
                    session.record_action(
                        "list_groups",
                        "okta",
                        true,
                        [("groups", count), ("membership_edges", membership_edges)],
                    );
                }
                Err(e) => {
                    let error = format!("groups: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "okta"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("apps") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "apps:list", || self.api.list_apps()).await {
                Ok(apps) => {
                    let count = apps.len() as u64;
                    let mut assignment_edges = 0u64;
                    for a in apps {
                        let mut app = Application {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: a.label.clone(),
                            version: None,
                            app_type: AppType::WebApp,
                            first_seen: now,
                            last_seen: now,
                        };
                        app.id = NodeId::from_natural_key(
                            &tenant_id,
                            "Application",
                            &app.natural_key(),
                        );

                        for user in &a.assigned_user_ids {
                            if let Some(user_id) = user_nodes.get(user) {
                                assignment_edges += 1;
                                result.edges.push(make_edge(
                                    tenant_id,
                                    now,
                                    *user_id,
                                    app.id,
                                    EdgeType::HasAccess,
                                    EdgeProperties::default(),
                                ));
                            }
                        }
                        result.applications.push(app);
                    }
                    session.record_action(
                        "list_apps",
                        "okta",
                        true,
                        [("apps", count), ("assignment_edges", assignment_edges)],
                    );
                }
                Err(e) => {
                    let error = format!("apps: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "okta"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("policies") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "policies:list", || self.api.list_policies())
                .await
            {
                Ok(policies) => {
                    let count = policies.len() as u64;
                    for p in policies {
                        let mut policy = Policy {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: p.name.clone(),
                            policy_type: PolicyType::ConditionalAccess,
                            source: "okta".to_string(),
                            rules_json: p.rules_json.clone(),
                            first_seen: now,
                            last_seen: now,
                        };
                        policy.id =
                            NodeId::from_natural_key(&tenant_id, "Policy", &policy.natural_key());
                        result.policies.push(policy);
                    }
                    session.record_action("list_policies", "okta", true, [("policies", count)]);
                }
                Err(e) => {
                    let error = format!("policies: {e}");
                    session.record_dead_end(&error, serde_json::json!({"source": "okta"}));
                    result.errors.push(error);
                }
            }
        }

        Ok(result)
    }
}

// ── HTTP transport ────────────────────────────────────────────────

mod api {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Org {
        #[serde(rename = "companyName", default)]
        pub company_name: String,
    }

    #[derive(Deserialize)]
    pub struct User {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub status: String,
        #[serde(default)]
        pub profile: UserProfile,
    }

    #[derive(Deserialize, Default)]
    pub struct UserProfile {
        #[serde(default)]
        pub login: String,
        #[serde(rename = "displayName", default)]
        pub display_name: Option<String>,
        #[serde(default)]
        pub email: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Factor {
        #[serde(rename = "factorType", default)]
        pub factor_type: String,
    }

    #[derive(Deserialize)]
    pub struct Group {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub profile: GroupProfile,
    }

    #[derive(Deserialize, Default)]
    pub struct GroupProfile {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct App {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub label: String,
        #[serde(default)]
        pub status: String,
    }

    #[derive(Deserialize)]
    pub struct AppUser {
        #[serde(default)]
        pub id: String,
    }

    #[derive(Deserialize)]
    pub struct Policy {
        #[serde(default)]
        pub name: String,
        #[serde(rename = "type", default)]
        pub policy_type: String,
        #[serde(default)]
        pub conditions: serde_json::Value,
    }
}

/// Okta REST transport with SSWS token auth.
pub struct HttpOktaApi {
    rest: RestClient,
    base_url: String,
    token: crate::credentials::SecretString,
}

impl HttpOktaApi {
    /// Build from a resolved secret bundle: `domain`, `api_token`.
    pub fn from_secret(secret: &Secret) -> Result<Self, SentinelError> {
        let domain = secret.require("okta", "domain")?.expose().trim_end_matches('/').to_string();
        let base_url = if domain.starts_with("https://") {
            domain
        } else {
            format!("https://{domain}")
        };
        Ok(Self {
            rest: RestClient::new("okta")?,
            base_url,
            token: secret.require("okta", "api_token")?.clone(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SentinelError> {
        let auth = format!("SSWS {}", self.token.expose());
        self.rest
            .get_json(
                &format!("{}{path}", self.base_url),
                &[],
                &[("Authorization", auth.as_str()), ("Accept", "application/json")],
            )
            .await
    }
}

#[async_trait]
impl OktaApi for HttpOktaApi {
    async fn org_name(&self) -> Result<String, SentinelError> {
        let org: api::Org = self.get("/api/v1/org").await?;
        Ok(org.company_name)
    }

    async fn list_users(&self) -> Result<Vec<OktaUser>, SentinelError> {
        let users: Vec<api::User> = self.get("/api/v1/users").await?;
        let mut out = Vec::with_capacity(users.len());
        for u in users {
            // Enrolled factors signal MFA; the lookup is best-effort.
            let mfa_enrolled = match self
                .get::<Vec<api::Factor>>(&format!("/api/v1/users/{}/factors", u.id))
                .await
            {
                Ok(factors) => Some(!factors.is_empty()),
                Err(_) => None,
            };
            out.push(OktaUser {
                okta_id: u.id,
                login: u.profile.login,
                display_name: u.profile.display_name,
                email: u.profile.email,
                active: u.status == "ACTIVE",
                mfa_enrolled,
            });
        }
        Ok(out)
    }

    async fn list_groups(&self) -> Result<Vec<OktaGroup>, SentinelError> {
        let groups: Vec<api::Group> = self.get("/api/v1/groups").await?;
        Ok(groups
            .into_iter()
            .map(|g| OktaGroup {
                okta_id: g.id,
                name: g.profile.name,
                description: g.profile.description,
            })
            .collect())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, SentinelError> {
        let members: Vec<api::AppUser> =
            self.get(&format!("/api/v1/groups/{group_id}/users")).await?;
        Ok(members.into_iter().map(|m| m.id).collect())
    }

    async fn list_apps(&self) -> Result<Vec<OktaApp>, SentinelError> {
        let apps: Vec<api::App> = self.get("/api/v1/apps").await?;
        let mut out = Vec::with_capacity(apps.len());
        for a in apps {
            let assigned: Vec<api::AppUser> = self
                .get(&format!("/api/v1/apps/{}/users", a.id))
                .await
                .unwrap_or_default();
            out.push(OktaApp {
                okta_id: a.id,
                label: a.label,
                active: a.status == "ACTIVE",
                assigned_user_ids: assigned.into_iter().map(|u| u.id).collect(),
            });
        }
        Ok(out)
    }

    async fn list_policies(&self) -> Result<Vec<OktaPolicy>, SentinelError> {
        let policies: Vec<api::Policy> = self
            .get("/api/v1/policies?type=OKTA_SIGN_ON")
            .await?;
        Ok(policies
            .into_iter()
            .map(|p| OktaPolicy {
                name: p.name,
                policy_type: p.policy_type,
                rules_json: serde_json::to_string(&p.conditions).ok(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::types::TenantId;

    struct FakeOktaApi;

    #[async_trait]
    impl OktaApi for FakeOktaApi {
        async fn org_name(&self) -> Result<String, SentinelError> {
            Ok("Acme".to_string())
        }

        async fn list_users(&self) -> Result<Vec<OktaUser>, SentinelError> {
            Ok(vec![OktaUser {
                okta_id: "00u1".to_string(),
                login: "carol@acme.com".to_string(),
                display_name: Some("Carol".to_string()),
                email: Some("carol@acme.com".to_string()),
                active: true,
                mfa_enrolled: Some(true),
            }])
        }

        async fn list_groups(&self) -> Result<Vec<OktaGroup>, SentinelError> {
            Ok(vec![OktaGroup {
                okta_id: "00g1".to_string(),
                name: "ops".to_string(),
                description: None,
            }])
        }

        async fn group_members(&self, _group_id: &str) -> Result<Vec<String>, SentinelError> {
            Ok(vec!["00u1".to_string()])
        }

        async fn list_apps(&self) -> Result<Vec<OktaApp>, SentinelError> {
            Ok(vec![OktaApp {
                okta_id: "0oa1".to_string(),
                label: "wiki".to_string(),
                active: true,
                assigned_user_ids: vec!["00u1".to_string()],
            }])
        }

        async fn list_policies(&self) -> Result<Vec<OktaPolicy>, SentinelError> {
            Ok(vec![OktaPolicy {
                name: "Default sign-on".to_string(),
                policy_type: "OKTA_SIGN_ON".to_string(),
                rules_json: None,
            }])
        }
    }

    #[tokio::test]
    async fn discovers_users_groups_apps_and_policies() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let connector =
            OktaConnector::new("okta-test", ConnectorConfig::default(), Arc::new(FakeOktaApi));
        let mut session = EngramSession::open(
            tenant.0,
            "connector/okta-test",
            "test",
            serde_json::Value::Null,
        );

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        assert_eq!(result.users.len(), 1);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.applications.len(), 1);
        assert_eq!(result.policies.len(), 1);

        let carol_id = NodeId::from_natural_key(&tenant, "User", "user:okta:carol@acme.com");
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::MemberOf && e.source_id == carol_id));
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::HasAccess && e.source_id == carol_id));

        assert_eq!(result.status(), crate::base::SyncStatus::Completed);
        drop(session);
    }
}
