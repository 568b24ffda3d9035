//! GCP connector — Compute Engine, VPC networks, subnetworks, firewall
//! rules, Cloud SQL, Cloud Storage, Cloud Functions, GKE.
//!
//! The source sits behind [`GcpApi`]; [`HttpGcpApi`] implements it over
//! the Google REST APIs with a bearer token, either provided through the
//! secret store or fetched from the instance metadata server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use sentinel_core::types::{
    AppType, Application, CloudProvider, Criticality, EdgeProperties, EdgeType, Host, NodeId,
    Policy, PolicyType, Protocol, Service, ServiceState, Subnet, Vpc,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::base::{make_edge, Connector, SyncResult};
use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;
use crate::http::RestClient;
use crate::retry::{with_retry, RateLimiter};

/// Boxed enumeration future, so one fetch helper covers every kind.
type FetchFut<T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<T>, SentinelError>> + Send>>;

// ── Source models ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GcpInstance {
    pub instance_id: String,
    pub name: String,
    pub zone: String,
    pub internal_ip: Option<String>,
    pub subnetwork: Option<String>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GcpNetwork {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GcpSubnetwork {
    pub name: String,
    pub network: String,
    pub cidr: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct GcpFirewall {
    pub name: String,
    pub network: String,
    pub rules_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GcpSqlInstance {
    pub name: String,
    pub database_version: Option<String>,
    pub port: u16,
    pub runnable: bool,
}

#[derive(Debug, Clone)]
pub struct GcpBucket {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GcpFunction {
    pub name: String,
    pub runtime: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GcpGkeCluster {
    pub name: String,
    pub endpoint: Option<String>,
    pub network: Option<String>,
    pub location: String,
}

/// Narrow seam over the Google Cloud control plane.
#[async_trait]
pub trait GcpApi: Send + Sync {
    async fn project_number(&self) -> Result<String, SentinelError>;
    async fn list_instances(&self) -> Result<Vec<GcpInstance>, SentinelError>;
    async fn list_networks(&self) -> Result<Vec<GcpNetwork>, SentinelError>;
    async fn list_subnetworks(&self) -> Result<Vec<GcpSubnetwork>, SentinelError>;
    async fn list_firewalls(&self) -> Result<Vec<GcpFirewall>, SentinelError>;
    async fn list_sql_instances(&self) -> Result<Vec<GcpSqlInstance>, SentinelError>;
    async fn list_buckets(&self) -> Result<Vec<GcpBucket>, SentinelError>;
    async fn list_functions(&self) -> Result<Vec<GcpFunction>, SentinelError>;
    async fn list_gke_clusters(&self) -> Result<Vec<GcpGkeCluster>, SentinelError>;
}

pub struct GcpConnector {
    name: String,
    config: ConnectorConfig,
    api: Arc<dyn GcpApi>,
    limiter: Arc<RateLimiter>,
}

impl GcpConnector {
    pub fn new(name: &str, config: ConnectorConfig, api: Arc<dyn GcpApi>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            name: name.to_string(),
            config,
            api,
            limiter,
        }
    }

    async fn fetch<T>(
        &self,
        ctx: &ScanContext,
        session: &mut EngramSession,
        errors: &mut Vec<String>,
        kind: &str,
        call: impl Fn() -> FetchFut<T>,
    ) -> Result<Vec<T>, SentinelError> {
        if !self.config.kind_enabled(kind) {
            return Ok(vec![]);
        }
        ctx.check_cancelled()?;
        self.limiter.acquire().await;
        match with_retry(&self.config.retry, kind, &call).await {
            Ok(items) => {
                session.record_action(kind, "gcp", true, [("items", items.len() as u64)]);
                Ok(items)
            }
            Err(e) => {
                let error = format!("{kind}: {e}");
                session.record_dead_end(&error, serde_json::json!({"provider": "gcp"}));
                errors.push(error);
                Ok(vec![])
            }
        }
    }
}

#[async_trait]
impl Connector for GcpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Gcp
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn health_check(&self, _ctx: &ScanContext, _creds: &Secret) -> Result<(), SentinelError> {
        self.limiter.acquire().await;
        let project = with_retry(&self.config.retry, "projects:get", || {
            self.api.project_number()
        })
        .await?;
        tracing::debug!(connector = %self.name, project = %project, "GCP health check passed");
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
        let mut errors = Vec::new();

        let api = self.api.clone();
        let networks = self
            .fetch(ctx, session, &mut errors, "networks", || -> FetchFut<GcpNetwork> {
                let api = api.clone();
                Box::pin(async move { api.list_networks().await })
            })
            .await?;
        let subnetworks = self
            .fetch(ctx, session, &mut errors, "subnetworks", || -> FetchFut<GcpSubnetwork> {
                let api = api.clone();
                Box::pin(async move { api.list_subnetworks().await })
            })
            .await?;
        let instances = self
            .fetch(ctx, session, &mut errors, "instances", || -> FetchFut<GcpInstance> {
                let api = api.clone();
                Box::pin(async move { api.list_instances().await })
            })
            .await?;
        let firewalls = self
            .fetch(ctx, session, &mut errors, "firewalls", || -> FetchFut<GcpFirewall> {
                let api = api.clone();
                Box::pin(async move { api.list_firewalls().await })
            })
            .await?;
        let sql_instances = self
            .fetch(ctx, session, &mut errors, "databases", || -> FetchFut<GcpSqlInstance> {
                let api = api.clone();
                Box::pin(async move { api.list_sql_instances().await })
            })
            .await?;
        let buckets = self
            .fetch(ctx, session, &mut errors, "buckets", || -> FetchFut<GcpBucket> {
                let api = api.clone();
                Box::pin(async move { api.list_buckets().await })
            })
            .await?;
        let functions = self
            .fetch(ctx, session, &mut errors, "functions", || -> FetchFut<GcpFunction> {
                let api = api.clone();
                Box::pin(async move { api.list_functions().await })
            })
            .await?;
        let gke_clusters = self
            .fetch(ctx, session, &mut errors, "clusters", || -> FetchFut<GcpGkeCluster> {
                let api = api.clone();
                Box::pin(async move { api.list_gke_clusters().await })
            })
            .await?;

        for n in &networks {
            let mut vpc = Vpc {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                vpc_id: n.name.clone(),
                name: Some(n.name.clone()),
                cidr: None,
                cloud_provider: CloudProvider::Gcp,
                region: "global".to_string(),
                first_seen: now,
                last_seen: now,
            };
            vpc.id = NodeId::from_natural_key(&tenant_id, "Vpc", &vpc.natural_key());
            result.vpcs.push(vpc);
        }

        // Subnetwork name → node id, for instance placement.
        let mut subnet_nodes: HashMap<String, NodeId> = HashMap::new();
        for s in &subnetworks {
            let mut subnet = Subnet {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                cidr: s.cidr.clone(),
                name: Some(s.name.clone()),
                cloud_provider: Some(CloudProvider::Gcp),
                vpc_id: Some(s.network.clone()),
                is_public: false,
                first_seen: now,
                last_seen: now,
            };
            subnet.id = NodeId::from_natural_key(&tenant_id, "Subnet", &subnet.natural_key());
            subnet_nodes.insert(s.name.clone(), subnet.id);

            let vpc_id =
                NodeId::from_natural_key(&tenant_id, "Vpc", &format!("vpc:{}", s.network));
            result.edges.push(make_edge(
                tenant_id,
                now,
                subnet.id,
                vpc_id,
                EdgeType::BelongsToVpc,
                EdgeProperties::default(),
            ));
            result.subnets.push(subnet);
        }

        for i in &instances {
            let mut host = Host {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                ip: i.internal_ip.clone().unwrap_or_default(),
                hostname: Some(i.name.clone()),
                os: None,
                os_version: None,
                mac_address: None,
                cloud_provider: Some(CloudProvider::Gcp),
                cloud_instance_id: Some(i.instance_id.clone()),
                cloud_region: Some(i.zone.clone()),
                criticality: Criticality::Medium,
                tags: i.labels.clone(),
                first_seen: now,
                last_seen: now,
            };
            host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());

            if let Some(subnet_node) =
                i.subnetwork.as_ref().and_then(|s| subnet_nodes.get(s))
            {
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    host.id,
                    *subnet_node,
                    EdgeType::BelongsToSubnet,
                    EdgeProperties::default(),
                ));
            }
            result.hosts.push(host);
        }

        for f in &firewalls {
            let mut policy = Policy {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: f.name.clone(),
                policy_type: PolicyType::FirewallRule,
                source: "gcp".to_string(),
                rules_json: f.rules_json.clone(),
                first_seen: now,
                last_seen: now,
            };
            policy.id = NodeId::from_natural_key(&tenant_id, "Policy", &policy.natural_key());

            // Firewall rules expose the network they govern.
            let vpc_id =
                NodeId::from_natural_key(&tenant_id, "Vpc", &format!("vpc:{}", f.network));
            result.edges.push(make_edge(
                tenant_id,
                now,
                policy.id,
                vpc_id,
                EdgeType::Exposes,
                EdgeProperties::default(),
            ));
            result.policies.push(policy);
        }

        for db in &sql_instances {
            let mut svc = Service {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: db.name.clone(),
                version: db.database_version.clone(),
                port: db.port,
                protocol: Protocol::Tcp,
                state: if db.runnable {
                    ServiceState::Running
                } else {
                    ServiceState::Stopped
                },
                banner: None,
                first_seen: now,
                last_seen: now,
            };
            svc.id = NodeId::from_natural_key(&tenant_id, "Service", &svc.natural_key());
            result.services.push(svc);
        }

        for b in &buckets {
            let mut app = Application {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: b.name.clone(),
                version: None,
                app_type: AppType::Bucket,
                first_seen: now,
                last_seen: now,
            };
            app.id = NodeId::from_natural_key(&tenant_id, "Application", &app.natural_key());
            result.applications.push(app);
        }

        for f in &functions {
            let mut app = Application {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: f.name.clone(),
                version: f.runtime.clone(),
                app_type: AppType::Lambda,
                first_seen: now,
                last_seen: now,
            };
            app.id = NodeId::from_natural_key(&tenant_id, "Application", &app.natural_key());
            result.applications.push(app);
        }

        for c in &gke_clusters {
            let mut host = Host {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                ip: c.endpoint.clone().unwrap_or_default(),
                hostname: Some(c.name.clone()),
                os: None,
                os_version: None,
                mac_address: None,
                cloud_provider: Some(CloudProvider::Gcp),
                cloud_instance_id: Some(format!("gke:{}", c.name)),
                cloud_region: Some(c.location.clone()),
                criticality: Criticality::High,
                tags: vec!["gke".to_string(), "kubernetes".to_string()],
                first_seen: now,
                last_seen: now,
            };
            host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());

            if let Some(network) = &c.network {
                let vpc_id =
                    NodeId::from_natural_key(&tenant_id, "Vpc", &format!("vpc:{network}"));
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    host.id,
                    vpc_id,
                    EdgeType::BelongsToVpc,
                    EdgeProperties::default(),
                ));
            }
            result.hosts.push(host);
        }

        result.errors = errors;
        Ok(result)
    }
}

// ── HTTP transport ────────────────────────────────────────────────

mod rest {
    use serde::Deserialize;

    #[derive(Deserialize, Default)]
    pub struct Project {
        #[serde(rename = "projectNumber", default)]
        pub project_number: String,
    }

    #[derive(Deserialize)]
    pub struct AggregatedInstances {
        #[serde(default)]
        pub items: std::collections::BTreeMap<String, InstanceScope>,
    }

    #[derive(Deserialize, Default)]
    pub struct InstanceScope {
        #[serde(default)]
        pub instances: Vec<Instance>,
    }

    #[derive(Deserialize)]
    pub struct Instance {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub zone: String,
        #[serde(rename = "networkInterfaces", default)]
        pub network_interfaces: Vec<NetworkInterface>,
        #[serde(default)]
        pub labels: std::collections::BTreeMap<String, String>,
    }

    #[derive(Deserialize, Default)]
    pub struct NetworkInterface {
        #[serde(rename = "networkIP", default)]
        pub network_ip: Option<String>,
        #[serde(default)]
        pub subnetwork: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
    pub struct ItemList<T> {
        #[serde(default)]
        pub items: Vec<T>,
    }

    #[derive(Deserialize)]
    pub struct Network {
        #[serde(default)]
        pub name: String,
    }

    #[derive(Deserialize)]
    pub struct AggregatedSubnetworks {
        #[serde(default)]
        pub items: std::collections::BTreeMap<String, SubnetworkScope>,
    }

    #[derive(Deserialize, Default)]
    pub struct SubnetworkScope {
        #[serde(default)]
        pub subnetworks: Vec<Subnetwork>,
    }

    #[derive(Deserialize)]
    pub struct Subnetwork {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub network: String,
        #[serde(rename = "ipCidrRange", default)]
        pub ip_cidr_range: String,
        #[serde(default)]
        pub region: String,
    }

    #[derive(Deserialize)]
    pub struct Firewall {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub network: String,
        #[serde(default)]
        pub allowed: serde_json::Value,
    }

    #[derive(Deserialize)]
    pub struct SqlInstances {
        #[serde(default)]
        pub items: Vec<SqlInstance>,
    }

    #[derive(Deserialize)]
    pub struct SqlInstance {
        #[serde(default)]
        pub name: String,
        #[serde(rename = "databaseVersion", default)]
        pub database_version: Option<String>,
        #[serde(default)]
        pub state: String,
    }

    #[derive(Deserialize)]
    pub struct Buckets {
        #[serde(default)]
        pub items: Vec<Bucket>,
    }

    #[derive(Deserialize)]
    pub struct Bucket {
        #[serde(default)]
        pub name: String,
    }

    #[derive(Deserialize)]
    pub struct Functions {
        #[serde(default)]
        pub functions: Vec<Function>,
    }

    #[derive(Deserialize)]
    pub struct Function {
        #[serde(default)]
        pub name: String,
        #[serde(rename = "buildConfig", default)]
        pub build_config: BuildConfig,
    }

    #[derive(Deserialize, Default)]
    pub struct BuildConfig {
        #[serde(default)]
        pub runtime: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Clusters {
        #[serde(default)]
        pub clusters: Vec<Cluster>,
    }

    #[derive(Deserialize)]
    pub struct Cluster {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub endpoint: Option<String>,
        #[serde(default)]
        pub network: Option<String>,
        #[serde(default)]
        pub location: String,
    }

    #[derive(Deserialize)]
    pub struct MetadataToken {
        pub access_token: String,
    }
}

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Google REST transport. The bearer token comes from the secret bundle
/// (`access_token`) or, when absent, from the instance metadata server.
pub struct HttpGcpApi {
    rest: RestClient,
    project_id: String,
    static_token: Option<crate::credentials::SecretString>,
}

impl HttpGcpApi {
    pub fn from_secret(secret: &Secret) -> Result<Self, SentinelError> {
        Ok(Self {
            rest: RestClient::new("gcp")?,
            project_id: secret.require("gcp", "project_id")?.expose().to_string(),
            static_token: secret.get("access_token").cloned(),
        })
    }

    async fn bearer(&self) -> Result<String, SentinelError> {
        if let Some(token) = &self.static_token {
            return Ok(token.expose().to_string());
        }
        let token: rest::MetadataToken = self
            .rest
            .get_json(METADATA_TOKEN_URL, &[], &[("Metadata-Flavor", "Google")])
            .await?;
        Ok(token.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SentinelError> {
        let token = self.bearer().await?;
        let auth = format!("Bearer {token}");
        self.rest
            .get_json(url, &[], &[("Authorization", auth.as_str())])
            .await
    }

    fn compute(&self, path: &str) -> String {
        format!(
            "https://compute.googleapis.com/compute/v1/projects/{}{path}",
            self.project_id
        )
    }
}

#[async_trait]
impl GcpApi for HttpGcpApi {
    async fn project_number(&self) -> Result<String, SentinelError> {
        let project: rest::Project = self
            .get(&format!(
                "https://cloudresourcemanager.googleapis.com/v1/projects/{}",
                self.project_id
            ))
            .await?;
        Ok(project.project_number)
    }

    async fn list_instances(&self) -> Result<Vec<GcpInstance>, SentinelError> {
        let response: rest::AggregatedInstances =
            self.get(&self.compute("/aggregated/instances")).await?;
        Ok(response
            .items
            .into_values()
            .flat_map(|scope| scope.instances)
            .map(|i| {
                let nic = i.network_interfaces.into_iter().next().unwrap_or_default();
                GcpInstance {
                    instance_id: i.id,
                    name: i.name,
                    zone: last_segment(&i.zone),
                    internal_ip: nic.network_ip,
                    subnetwork: nic.subnetwork.map(|s| last_segment(&s)),
                    labels: i.labels.into_keys().collect(),
                }
            })
            .collect())
    }

    async fn list_networks(&self) -> Result<Vec<GcpNetwork>, SentinelError> {
        let response: rest::ItemList<rest::Network> =
            self.get(&self.compute("/global/networks")).await?;
        Ok(response
            .items
            .into_iter()
            .map(|n| GcpNetwork { name: n.name })
            .collect())
    }

    async fn list_subnetworks(&self) -> Result<Vec<GcpSubnetwork>, SentinelError> {
        let response: rest::AggregatedSubnetworks =
            self.get(&self.compute("/aggregated/subnetworks")).await?;
        Ok(response
            .items
            .into_values()
            .flat_map(|scope| scope.subnetworks)
            .map(|s| GcpSubnetwork {
                name: s.name,
                network: last_segment(&s.network),
                cidr: s.ip_cidr_range,
                region: last_segment(&s.region),
            })
            .collect())
    }

    async fn list_firewalls(&self) -> Result<Vec<GcpFirewall>, SentinelError> {
        let response: rest::ItemList<rest::Firewall> =
            self.get(&self.compute("/global/firewalls")).await?;
        Ok(response
            .items
            .into_iter()
            .map(|f| GcpFirewall {
                name: f.name,
                network: last_segment(&f.network),
                rules_json: serde_json::to_string(&f.allowed).ok(),
            })
            .collect())
    }

    async fn list_sql_instances(&self) -> Result<Vec<GcpSqlInstance>, SentinelError> {
        let response: rest::SqlInstances = self
            .get(&format!(
                "https://sqladmin.googleapis.com/v1/projects/{}/instances",
                self.project_id
            ))
            .await?;
        Ok(response
            .items
            .into_iter()
            .map(|i| GcpSqlInstance {
                name: i.name,
                port: default_sql_port(i.database_version.as_deref()),
                database_version: i.database_version,
                runnable: i.state == "RUNNABLE",
            })
            .collect())
    }

    async fn list_buckets(&self) -> Result<Vec<GcpBucket>, SentinelError> {
        let token = self.bearer().await?;
        let auth = format!("Bearer {token}");
        let response: rest::Buckets = self
            .rest
            .get_json(
                "https://storage.googleapis.com/storage/v1/b",
                &[("project", self.project_id.as_str())],
                &[("Authorization", auth.as_str())],
            )
            .await?;
        Ok(response
            .items
            .into_iter()
            .map(|b| GcpBucket { name: b.name })
            .collect())
    }

    async fn list_functions(&self) -> Result<Vec<GcpFunction>, SentinelError> {
        let response: rest::Functions = self
            .get(&format!(
                "https://cloudfunctions.googleapis.com/v2/projects/{}/locations/-/functions",
                self.project_id
            ))
            .await?;
        Ok(response
            .functions
            .into_iter()
            .map(|f| GcpFunction {
                name: last_segment(&f.name),
                runtime: f.build_config.runtime,
            })
            .collect())
    }

    async fn list_gke_clusters(&self) -> Result<Vec<GcpGkeCluster>, SentinelError> {
        let response: rest::Clusters = self
            .get(&format!(
                "https://container.googleapis.com/v1/projects/{}/locations/-/clusters",
                self.project_id
            ))
            .await?;
        Ok(response
            .clusters
            .into_iter()
            .map(|c| GcpGkeCluster {
                name: c.name,
                endpoint: c.endpoint,
                network: c.network.map(|n| last_segment(&n)),
                location: c.location,
            })
            .collect())
    }
}

fn last_segment(url_or_name: &str) -> String {
    url_or_name
        .rsplit('/')
        .next()
        .unwrap_or(url_or_name)
        .to_string()
}

fn default_sql_port(database_version: Option<&str>) -> u16 {
    match database_version {
        Some(v) if v.starts_with("MYSQL") => 3306,
        Some(v) if v.starts_with("SQLSERVER") => 1433,
        _ => 5432,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::types::TenantId;

    struct FakeGcpApi;

    #[async_trait]
    impl GcpApi for FakeGcpApi {
        async fn project_number(&self) -> Result<String, SentinelError> {
            Ok("1234".to_string())
        }

        async fn list_instances(&self) -> Result<Vec<GcpInstance>, SentinelError> {
            Ok(vec![GcpInstance {
                instance_id: "555".to_string(),
                name: "worker-0".to_string(),
                zone: "us-central1-a".to_string(),
                internal_ip: Some("10.128.0.2".to_string()),
                subnetwork: Some("default".to_string()),
                labels: vec!["batch".to_string()],
            }])
        }

        async fn list_networks(&self) -> Result<Vec<GcpNetwork>, SentinelError> {
            Ok(vec![GcpNetwork {
                name: "default".to_string(),
            }])
        }

        async fn list_subnetworks(&self) -> Result<Vec<GcpSubnetwork>, SentinelError> {
            Ok(vec![GcpSubnetwork {
                name: "default".to_string(),
                network: "default".to_string(),
                cidr: "10.128.0.0/20".to_string(),
                region: "us-central1".to_string(),
            }])
        }

        async fn list_firewalls(&self) -> Result<Vec<GcpFirewall>, SentinelError> {
            Ok(vec![GcpFirewall {
                name: "allow-ssh".to_string(),
                network: "default".to_string(),
                rules_json: Some(r#"[{"IPProtocol":"tcp","ports":["22"]}]"#.to_string()),
            }])
        }

        async fn list_sql_instances(&self) -> Result<Vec<GcpSqlInstance>, SentinelError> {
            Ok(vec![GcpSqlInstance {
                name: "billing-db".to_string(),
                database_version: Some("POSTGRES_15".to_string()),
                port: 5432,
                runnable: true,
            }])
        }

        async fn list_buckets(&self) -> Result<Vec<GcpBucket>, SentinelError> {
            Ok(vec![GcpBucket {
                name: "exports".to_string(),
            }])
        }

        async fn list_functions(&self) -> Result<Vec<GcpFunction>, SentinelError> {
            Ok(vec![])
        }

        async fn list_gke_clusters(&self) -> Result<Vec<GcpGkeCluster>, SentinelError> {
            Ok(vec![GcpGkeCluster {
                name: "prod".to_string(),
                endpoint: Some("34.1.2.3".to_string()),
                network: Some("default".to_string()),
                location: "us-central1".to_string(),
            }])
        }
    }

    #[tokio::test]
    async fn discovers_and_places_instances() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let connector =
            GcpConnector::new("gcp-test", ConnectorConfig::default(), Arc::new(FakeGcpApi));
        let mut session =
            EngramSession::open(tenant.0, "connector/gcp-test", "test", serde_json::Value::Null);

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        assert_eq!(result.hosts.len(), 2); // instance + GKE cluster
        assert_eq!(result.vpcs.len(), 1);
        assert_eq!(result.subnets.len(), 1);
        assert_eq!(result.policies.len(), 1);
        assert_eq!(result.services.len(), 1);
        assert_eq!(result.applications.len(), 1);
        assert!(result.errors.is_empty());

        // worker-0 placed in its subnetwork, GKE in its network.
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::BelongsToSubnet));
        let gke_id = NodeId::from_natural_key(&tenant, "Host", "host:gke:prod");
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::BelongsToVpc && e.source_id == gke_id));
        drop(session);
    }

    #[test]
    fn sql_port_by_engine() {
        assert_eq!(default_sql_port(Some("MYSQL_8_0")), 3306);
        assert_eq!(default_sql_port(Some("SQLSERVER_2019")), 1433);
        assert_eq!(default_sql_port(Some("POSTGRES_15")), 5432);
        assert_eq!(default_sql_port(None), 5432);
    }
}
