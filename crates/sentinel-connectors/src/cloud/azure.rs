//! Azure connector — VMs, virtual networks, subnets, NSGs, SQL servers.
//!
//! Talks to the Azure Resource Manager REST API behind [`AzureApi`];
//! [`HttpAzureApi`] implements it with bearer credentials from the
//! client-credentials flow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use sentinel_core::types::{
    CloudProvider, Criticality, EdgeProperties, EdgeType, Host, NodeId, Policy, PolicyType,
    Protocol, Service, ServiceState, Subnet, Vpc,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::base::{make_edge, Connector, SyncResult};
use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;
use crate::http::{client_credentials_token, RestClient};
use crate::retry::{with_retry, RateLimiter};

const ARM_BASE: &str = "https://management.azure.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";

// ── Source models ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AzureVm {
    pub vm_id: String,
    pub name: String,
    pub location: String,
    pub os_type: Option<String>,
    pub private_ip: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AzureVnet {
    pub name: String,
    pub location: String,
    pub address_prefix: Option<String>,
    pub subnets: Vec<AzureSubnet>,
}

#[derive(Debug, Clone)]
pub struct AzureSubnet {
    pub name: String,
    pub address_prefix: String,
}

#[derive(Debug, Clone)]
pub struct AzureNsg {
    pub name: String,
    pub rules_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AzureSqlServer {
    pub name: String,
    pub fqdn: Option<String>,
    pub ready: bool,
}

/// Narrow seam over the ARM control plane.
#[async_trait]
pub trait AzureApi: Send + Sync {
    async fn subscription_display_name(&self) -> Result<String, SentinelError>;
    async fn list_vms(&self) -> Result<Vec<AzureVm>, SentinelError>;
    async fn list_vnets(&self) -> Result<Vec<AzureVnet>, SentinelError>;
    async fn list_nsgs(&self) -> Result<Vec<AzureNsg>, SentinelError>;
    async fn list_sql_servers(&self) -> Result<Vec<AzureSqlServer>, SentinelError>;
}

pub struct AzureConnector {
    name: String,
    config: ConnectorConfig,
    api: Arc<dyn AzureApi>,
    limiter: Arc<RateLimiter>,
}

impl AzureConnector {
    pub fn new(name: &str, config: ConnectorConfig, api: Arc<dyn AzureApi>) -> Self {
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
impl Connector for AzureConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Azure
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn health_check(&self, _ctx: &ScanContext, _creds: &Secret) -> Result<(), SentinelError> {
        self.limiter.acquire().await;
        let subscription = with_retry(&self.config.retry, "subscriptions:get", || {
            self.api.subscription_display_name()
        })
        .await?;
        tracing::debug!(connector = %self.name, subscription = %subscription, "Azure health check passed");
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

        // Virtual networks first: VM and SQL placement hangs off them.
        if self.config.kind_enabled("vnets") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "vnets:list", || self.api.list_vnets()).await {
                Ok(vnets) => {
                    let count = vnets.len() as u64;
                    for vnet in vnets {
                        let mut vpc = Vpc {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            vpc_id: vnet.name.clone(),
                            name: Some(vnet.name.clone()),
                            cidr: vnet.address_prefix.clone(),
                            cloud_provider: CloudProvider::Azure,
                            region: vnet.location.clone(),
                            first_seen: now,
                            last_seen: now,
                        };
                        vpc.id = NodeId::from_natural_key(&tenant_id, "Vpc", &vpc.natural_key());

                        for s in &vnet.subnets {
                            let mut subnet = Subnet {
                                id: NodeId(uuid::Uuid::nil()),
                                tenant_id,
                                cidr: s.address_prefix.clone(),
                                name: Some(s.name.clone()),
                                cloud_provider: Some(CloudProvider::Azure),
                                vpc_id: Some(vnet.name.clone()),
                                is_public: false,
                                first_seen: now,
                                last_seen: now,
                            };
                            subnet.id = NodeId::from_natural_key(
                                &tenant_id,
                                "Subnet",
                                &subnet.natural_key(),
                            );
                            result.edges.push(make_edge(
                                tenant_id,
                                now,
                                subnet.id,
                                vpc.id,
                                EdgeType::BelongsToVpc,
                                EdgeProperties::default(),
                            ));
                            result.subnets.push(subnet);
                        }
                        result.vpcs.push(vpc);
                    }
                    session.record_action("list_vnets", "arm", true, [("vnets", count)]);
                }
                Err(e) => {
                    let error = format!("vnets: {e}");
                    session.record_dead_end(&error, serde_json::json!({"provider": "azure"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("vms") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "vms:list", || self.api.list_vms()).await {
                Ok(vms) => {
                    let count = vms.len() as u64;
                    for vm in vms {
                        let mut host = Host {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            ip: vm.private_ip.clone().unwrap_or_default(),
                            hostname: Some(vm.name.clone()),
                            os: vm.os_type.clone(),
                            os_version: None,
                            mac_address: None,
                            cloud_provider: Some(CloudProvider::Azure),
                            cloud_instance_id: Some(vm.vm_id.clone()),
                            cloud_region: Some(vm.location.clone()),
                            criticality: Criticality::Medium,
                            tags: vm.tags.clone(),
                            first_seen: now,
                            last_seen: now,
                        };
                        host.id =
                            NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());
                        result.hosts.push(host);
                    }
                    session.record_action("list_vms", "arm", true, [("vms", count)]);
                }
                Err(e) => {
                    let error = format!("vms: {e}");
                    session.record_dead_end(&error, serde_json::json!({"provider": "azure"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("nsgs") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "nsgs:list", || self.api.list_nsgs()).await {
                Ok(nsgs) => {
                    let count = nsgs.len() as u64;
                    for nsg in nsgs {
                        let mut policy = Policy {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: nsg.name.clone(),
                            policy_type: PolicyType::SecurityGroup,
                            source: "azure".to_string(),
                            rules_json: nsg.rules_json.clone(),
                            first_seen: now,
                            last_seen: now,
                        };
                        policy.id =
                            NodeId::from_natural_key(&tenant_id, "Policy", &policy.natural_key());
                        result.policies.push(policy);
                    }
                    session.record_action("list_nsgs", "arm", true, [("nsgs", count)]);
                }
                Err(e) => {
                    let error = format!("nsgs: {e}");
                    session.record_dead_end(&error, serde_json::json!({"provider": "azure"}));
                    result.errors.push(error);
                }
            }
        }

        if self.config.kind_enabled("databases") {
            ctx.check_cancelled()?;
            self.limiter.acquire().await;
            match with_retry(&self.config.retry, "sql:list", || self.api.list_sql_servers())
                .await
            {
                Ok(servers) => {
                    let count = servers.len() as u64;
                    for server in servers {
                        let mut svc = Service {
                            id: NodeId(uuid::Uuid::nil()),
                            tenant_id,
                            name: server.name.clone(),
                            version: None,
                            port: 1433,
                            protocol: Protocol::Tcp,
                            state: if server.ready {
                                ServiceState::Running
                            } else {
                                ServiceState::Stopped
                            },
                            banner: server.fqdn.clone(),
                            first_seen: now,
                            last_seen: now,
                        };
                        svc.id =
                            NodeId::from_natural_key(&tenant_id, "Service", &svc.natural_key());
                        result.services.push(svc);
                    }
                    session.record_action("list_sql_servers", "arm", true, [("servers", count)]);
                }
                Err(e) => {
                    let error = format!("sql: {e}");
                    session.record_dead_end(&error, serde_json::json!({"provider": "azure"}));
                    result.errors.push(error);
                }
            }
        }

        Ok(result)
    }
}

// ── HTTP transport ────────────────────────────────────────────────

mod arm {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Collection<T> {
        #[serde(default = "Vec::new")]
        pub value: Vec<T>,
    }

    #[derive(Deserialize)]
    pub struct Subscription {
        #[serde(rename = "displayName", default)]
        pub display_name: String,
    }

    #[derive(Deserialize)]
    pub struct Vm {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub location: String,
        #[serde(default)]
        pub properties: VmProperties,
        #[serde(default)]
        pub tags: std::collections::BTreeMap<String, String>,
    }

    #[derive(Deserialize, Default)]
    pub struct VmProperties {
        #[serde(rename = "vmId", default)]
        pub vm_id: String,
        #[serde(rename = "storageProfile", default)]
        pub storage_profile: StorageProfile,
    }

    #[derive(Deserialize, Default)]
    pub struct StorageProfile {
        #[serde(rename = "osDisk", default)]
        pub os_disk: OsDisk,
    }

    #[derive(Deserialize, Default)]
    pub struct OsDisk {
        #[serde(rename = "osType", default)]
        pub os_type: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Vnet {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub location: String,
        #[serde(default)]
        pub properties: VnetProperties,
    }

    #[derive(Deserialize, Default)]
    pub struct VnetProperties {
        #[serde(rename = "addressSpace", default)]
        pub address_space: AddressSpace,
        #[serde(default = "Vec::new")]
        pub subnets: Vec<VnetSubnet>,
    }

    #[derive(Deserialize, Default)]
    pub struct AddressSpace {
        #[serde(rename = "addressPrefixes", default)]
        pub address_prefixes: Vec<String>,
    }

    #[derive(Deserialize)]
    pub struct VnetSubnet {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub properties: VnetSubnetProperties,
    }

    #[derive(Deserialize, Default)]
    pub struct VnetSubnetProperties {
        #[serde(rename = "addressPrefix", default)]
        pub address_prefix: String,
    }

    #[derive(Deserialize)]
    pub struct Nsg {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub properties: serde_json::Value,
    }

    #[derive(Deserialize)]
    pub struct SqlServer {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub properties: SqlServerProperties,
    }

    #[derive(Deserialize, Default)]
    pub struct SqlServerProperties {
        #[serde(rename = "fullyQualifiedDomainName", default)]
        pub fqdn: Option<String>,
        #[serde(default)]
        pub state: String,
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// ARM REST transport with client-credentials auth.
pub struct HttpAzureApi {
    rest: RestClient,
    directory_tenant: String,
    client_id: String,
    client_secret: crate::credentials::SecretString,
    subscription_id: String,
    token: Mutex<Option<CachedToken>>,
}

impl HttpAzureApi {
    /// Build from a resolved secret bundle: `directory_tenant_id`,
    /// `client_id`, `client_secret`, `subscription_id`.
    pub fn from_secret(secret: &Secret) -> Result<Self, SentinelError> {
        Ok(Self {
            rest: RestClient::new("azure")?,
            directory_tenant: secret.require("azure", "directory_tenant_id")?.expose().to_string(),
            client_id: secret.require("azure", "client_id")?.expose().to_string(),
            client_secret: secret.require("azure", "client_secret")?.clone(),
            subscription_id: secret.require("azure", "subscription_id")?.expose().to_string(),
            token: Mutex::new(None),
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
            ARM_SCOPE,
        )
        .await?;

        let ttl = response.expires_in.unwrap_or(3600).saturating_sub(60);
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(response.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<T, SentinelError> {
        let token = self.bearer().await?;
        let url = format!("{ARM_BASE}/subscriptions/{}{path}", self.subscription_id);
        let auth = format!("Bearer {token}");
        self.rest
            .get_json(
                &url,
                &[("api-version", api_version)],
                &[("Authorization", auth.as_str())],
            )
            .await
    }
}

#[async_trait]
impl AzureApi for HttpAzureApi {
    async fn subscription_display_name(&self) -> Result<String, SentinelError> {
        let sub: arm::Subscription = self.get("", "2022-12-01").await?;
        Ok(sub.display_name)
    }

    async fn list_vms(&self) -> Result<Vec<AzureVm>, SentinelError> {
        let vms: arm::Collection<arm::Vm> = self
            .get(
                "/providers/Microsoft.Compute/virtualMachines",
                "2023-07-01",
            )
            .await?;
        Ok(vms
            .value
            .into_iter()
            .map(|vm| AzureVm {
                vm_id: vm.properties.vm_id,
                name: vm.name,
                location: vm.location,
                os_type: vm.properties.storage_profile.os_disk.os_type,
                private_ip: None,
                tags: vm.tags.into_keys().collect(),
            })
            .collect())
    }

    async fn list_vnets(&self) -> Result<Vec<AzureVnet>, SentinelError> {
        let vnets: arm::Collection<arm::Vnet> = self
            .get(
                "/providers/Microsoft.Network/virtualNetworks",
                "2023-05-01",
            )
            .await?;
        Ok(vnets
            .value
            .into_iter()
            .map(|v| AzureVnet {
                name: v.name,
                location: v.location,
                address_prefix: v.properties.address_space.address_prefixes.first().cloned(),
                subnets: v
                    .properties
                    .subnets
                    .into_iter()
                    .map(|s| AzureSubnet {
                        name: s.name,
                        address_prefix: s.properties.address_prefix,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn list_nsgs(&self) -> Result<Vec<AzureNsg>, SentinelError> {
        let nsgs: arm::Collection<arm::Nsg> = self
            .get(
                "/providers/Microsoft.Network/networkSecurityGroups",
                "2023-05-01",
            )
            .await?;
        Ok(nsgs
            .value
            .into_iter()
            .map(|n| AzureNsg {
                name: n.name,
                rules_json: serde_json::to_string(&n.properties).ok(),
            })
            .collect())
    }

    async fn list_sql_servers(&self) -> Result<Vec<AzureSqlServer>, SentinelError> {
        let servers: arm::Collection<arm::SqlServer> = self
            .get("/providers/Microsoft.Sql/servers", "2023-05-01-preview")
            .await?;
        Ok(servers
            .value
            .into_iter()
            .map(|s| AzureSqlServer {
                name: s.name,
                fqdn: s.properties.fqdn,
                ready: s.properties.state == "Ready",
            })
            .collect())
    }
}
