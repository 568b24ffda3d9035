//! AWS connector — EC2, VPC, IAM, S3, RDS, Lambda, ECS, EKS, and
//! security groups.
//!
//! The source sits behind [`AwsApi`]; production deployments bind the
//! vendor SDK to that trait, tests substitute deterministic doubles.
//! Region enumeration fans out under the configured parallelism cap;
//! normalization runs sequentially so the engram trail stays ordered.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use sentinel_core::types::{
    AppType, Application, CloudProvider, Criticality, EdgeProperties, EdgeType, Host,
    IdentitySource, NodeId, Policy, PolicyType, Protocol, Role, Service, ServiceState, Subnet,
    User, UserType, Vpc,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::base::{make_edge, Connector, SyncResult};
use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;
use crate::retry::{with_retry, RateLimiter};

// ── Source models ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AwsVpc {
    pub vpc_id: String,
    pub cidr: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AwsSubnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr: String,
    pub name: Option<String>,
    pub public: bool,
}

#[derive(Debug, Clone)]
pub struct AwsInstance {
    pub instance_id: String,
    pub private_ip: Option<String>,
    pub name: Option<String>,
    pub platform: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group_ids: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AwsSecurityGroup {
    pub group_id: String,
    pub group_name: String,
    pub rules_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AwsIamUser {
    pub user_name: String,
    pub arn: String,
    pub mfa_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AwsIamRole {
    pub role_name: String,
    pub arn: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AwsBucket {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AwsDbInstance {
    pub identifier: String,
    pub engine: Option<String>,
    pub port: u16,
    pub available: bool,
    pub vpc_id: Option<String>,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AwsLambdaFunction {
    pub function_name: String,
    pub runtime: Option<String>,
    pub role_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AwsEcsService {
    pub service_name: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone)]
pub struct AwsEksCluster {
    pub name: String,
    pub arn: String,
    pub endpoint: Option<String>,
    pub vpc_id: Option<String>,
    pub subnet_ids: Vec<String>,
}

/// Narrow seam over the AWS control plane. The official SDK binds here in
/// production; tests inject doubles.
#[async_trait]
pub trait AwsApi: Send + Sync {
    async fn caller_identity(&self) -> Result<String, SentinelError>;
    async fn describe_vpcs(&self, region: &str) -> Result<Vec<AwsVpc>, SentinelError>;
    async fn describe_subnets(&self, region: &str) -> Result<Vec<AwsSubnet>, SentinelError>;
    async fn describe_instances(&self, region: &str) -> Result<Vec<AwsInstance>, SentinelError>;
    async fn describe_security_groups(
        &self,
        region: &str,
    ) -> Result<Vec<AwsSecurityGroup>, SentinelError>;
    async fn describe_db_instances(
        &self,
        region: &str,
    ) -> Result<Vec<AwsDbInstance>, SentinelError>;
    async fn list_functions(&self, region: &str)
        -> Result<Vec<AwsLambdaFunction>, SentinelError>;
    async fn list_ecs_services(&self, region: &str) -> Result<Vec<AwsEcsService>, SentinelError>;
    async fn list_eks_clusters(&self, region: &str) -> Result<Vec<AwsEksCluster>, SentinelError>;
    async fn list_iam_users(&self) -> Result<Vec<AwsIamUser>, SentinelError>;
    async fn list_iam_roles(&self) -> Result<Vec<AwsIamRole>, SentinelError>;
    async fn list_buckets(&self) -> Result<Vec<AwsBucket>, SentinelError>;
}

/// Everything one region yielded, before normalization.
#[derive(Debug, Default)]
struct RegionYield {
    region: String,
    vpcs: Vec<AwsVpc>,
    subnets: Vec<AwsSubnet>,
    instances: Vec<AwsInstance>,
    security_groups: Vec<AwsSecurityGroup>,
    db_instances: Vec<AwsDbInstance>,
    functions: Vec<AwsLambdaFunction>,
    ecs_services: Vec<AwsEcsService>,
    eks_clusters: Vec<AwsEksCluster>,
    errors: Vec<String>,
}

pub struct AwsConnector {
    name: String,
    config: ConnectorConfig,
    api: Arc<dyn AwsApi>,
    limiter: Arc<RateLimiter>,
}

impl AwsConnector {
    pub fn new(name: &str, config: ConnectorConfig, api: Arc<dyn AwsApi>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            name: name.to_string(),
            config,
            api,
            limiter,
        }
    }

    async fn enumerate_region(
        api: Arc<dyn AwsApi>,
        limiter: Arc<RateLimiter>,
        config: ConnectorConfig,
        region: String,
    ) -> RegionYield {
        let mut y = RegionYield {
            region: region.clone(),
            ..Default::default()
        };

        macro_rules! fetch {
            ($kind:literal, $field:ident, $call:ident) => {
                if config.kind_enabled($kind) {
                    limiter.acquire().await;
                    match with_retry(&config.retry, $kind, || api.$call(&region)).await {
                        Ok(items) => y.$field = items,
                        Err(e) => y.errors.push(format!("{}/{}: {e}", region, $kind)),
                    }
                }
            };
        }

        fetch!("vpcs", vpcs, describe_vpcs);
        fetch!("subnets", subnets, describe_subnets);
        fetch!("instances", instances, describe_instances);
        fetch!("security_groups", security_groups, describe_security_groups);
        fetch!("databases", db_instances, describe_db_instances);
        fetch!("functions", functions, list_functions);
        fetch!("containers", ecs_services, list_ecs_services);
        fetch!("clusters", eks_clusters, list_eks_clusters);

        y
    }

    fn normalize_region(
        &self,
        ctx: &ScanContext,
        session: &mut EngramSession,
        result: &mut SyncResult,
        y: RegionYield,
    ) {
        let tenant_id = ctx.tenant_id;
        let now = ctx.now;
        let region = y.region.clone();

        // Subnet cloud-ids are opaque; remember the node each one became
        // for instance placement edges.
        let mut subnet_nodes: HashMap<String, NodeId> = HashMap::new();

        for v in &y.vpcs {
            let mut vpc = Vpc {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                vpc_id: v.vpc_id.clone(),
                name: v.name.clone(),
                cidr: v.cidr.clone(),
                cloud_provider: CloudProvider::Aws,
                region: region.clone(),
                first_seen: now,
                last_seen: now,
            };
            vpc.id = NodeId::from_natural_key(&tenant_id, "Vpc", &vpc.natural_key());
            result.vpcs.push(vpc);
        }

        for s in &y.subnets {
            let mut subnet = Subnet {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                cidr: s.cidr.clone(),
                name: s.name.clone(),
                cloud_provider: Some(CloudProvider::Aws),
                vpc_id: Some(s.vpc_id.clone()),
                is_public: s.public,
                first_seen: now,
                last_seen: now,
            };
            subnet.id = NodeId::from_natural_key(&tenant_id, "Subnet", &subnet.natural_key());
            subnet_nodes.insert(s.subnet_id.clone(), subnet.id);

            // Subnet → VPC
            let vpc_id = NodeId::from_natural_key(&tenant_id, "Vpc", &format!("vpc:{}", s.vpc_id));
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

        for sg in &y.security_groups {
            let mut policy = Policy {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: sg.group_name.clone(),
                policy_type: PolicyType::SecurityGroup,
                source: format!("aws:{}", sg.group_id),
                rules_json: sg.rules_json.clone(),
                first_seen: now,
                last_seen: now,
            };
            policy.id = NodeId::from_natural_key(&tenant_id, "Policy", &policy.natural_key());
            result.policies.push(policy);
        }

        for i in &y.instances {
            let mut host = Host {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                ip: i.private_ip.clone().unwrap_or_default(),
                hostname: i.name.clone().or_else(|| Some(i.instance_id.clone())),
                os: i.platform.clone().or_else(|| Some("linux".to_string())),
                os_version: None,
                mac_address: None,
                cloud_provider: Some(CloudProvider::Aws),
                cloud_instance_id: Some(i.instance_id.clone()),
                cloud_region: Some(region.clone()),
                criticality: Criticality::Medium,
                tags: i.tags.clone(),
                first_seen: now,
                last_seen: now,
            };
            host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());

            if let Some(subnet_node) = i.subnet_id.as_ref().and_then(|s| subnet_nodes.get(s)) {
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    host.id,
                    *subnet_node,
                    EdgeType::BelongsToSubnet,
                    EdgeProperties::default(),
                ));
            }
            for sg_id in &i.security_group_ids {
                let policy_id = sg_policy_id(&tenant_id, &y.security_groups, sg_id);
                if let Some(policy_id) = policy_id {
                    result.edges.push(make_edge(
                        tenant_id,
                        now,
                        policy_id,
                        host.id,
                        EdgeType::Exposes,
                        EdgeProperties::default(),
                    ));
                }
            }
            result.hosts.push(host);
        }

        for db in &y.db_instances {
            let mut svc = Service {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: db.identifier.clone(),
                version: db.engine.clone(),
                port: db.port,
                protocol: Protocol::Tcp,
                state: if db.available {
                    ServiceState::Running
                } else {
                    ServiceState::Stopped
                },
                banner: None,
                first_seen: now,
                last_seen: now,
            };
            svc.id = NodeId::from_natural_key(&tenant_id, "Service", &svc.natural_key());

            // Managed databases run inside their VPC.
            if let Some(vpc) = &db.vpc_id {
                let vpc_node = NodeId::from_natural_key(&tenant_id, "Vpc", &format!("vpc:{vpc}"));
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    svc.id,
                    vpc_node,
                    EdgeType::RunsOn,
                    EdgeProperties::default(),
                ));
            }
            for sg_id in &db.security_group_ids {
                if let Some(policy_id) = sg_policy_id(&tenant_id, &y.security_groups, sg_id) {
                    result.edges.push(make_edge(
                        tenant_id,
                        now,
                        policy_id,
                        svc.id,
                        EdgeType::Exposes,
                        EdgeProperties {
                            port: Some(db.port),
                            protocol: Some(Protocol::Tcp),
                            ..Default::default()
                        },
                    ));
                }
            }
            result.services.push(svc);
        }

        for f in &y.functions {
            let mut app = Application {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: f.function_name.clone(),
                version: f.runtime.clone(),
                app_type: AppType::Lambda,
                first_seen: now,
                last_seen: now,
            };
            app.id = NodeId::from_natural_key(&tenant_id, "Application", &app.natural_key());

            if let Some(role_name) = &f.role_name {
                let role_id = NodeId::from_natural_key(
                    &tenant_id,
                    "Role",
                    &format!("role:aws_iam:{role_name}"),
                );
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    app.id,
                    role_id,
                    EdgeType::HasAccess,
                    EdgeProperties::default(),
                ));
            }
            result.applications.push(app);
        }

        for e in &y.ecs_services {
            let mut app = Application {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                name: e.service_name.clone(),
                version: Some(e.cluster_name.clone()),
                app_type: AppType::ContainerImage,
                first_seen: now,
                last_seen: now,
            };
            app.id = NodeId::from_natural_key(&tenant_id, "Application", &app.natural_key());
            result.applications.push(app);
        }

        for c in &y.eks_clusters {
            let mut host = Host {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                ip: c.endpoint.clone().unwrap_or_default(),
                hostname: Some(c.name.clone()),
                os: None,
                os_version: None,
                mac_address: None,
                cloud_provider: Some(CloudProvider::Aws),
                cloud_instance_id: Some(c.arn.clone()),
                cloud_region: Some(region.clone()),
                criticality: Criticality::High,
                tags: vec!["eks".to_string(), "kubernetes".to_string()],
                first_seen: now,
                last_seen: now,
            };
            host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());

            if let Some(vpc) = &c.vpc_id {
                let vpc_node = NodeId::from_natural_key(&tenant_id, "Vpc", &format!("vpc:{vpc}"));
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    host.id,
                    vpc_node,
                    EdgeType::BelongsToVpc,
                    EdgeProperties::default(),
                ));
            }
            for subnet_id in &c.subnet_ids {
                if let Some(subnet_node) = subnet_nodes.get(subnet_id) {
                    result.edges.push(make_edge(
                        tenant_id,
                        now,
                        host.id,
                        *subnet_node,
                        EdgeType::BelongsToSubnet,
                        EdgeProperties::default(),
                    ));
                }
            }
            result.hosts.push(host);
        }

        session.record_action(
            "enumerate_region",
            &region,
            y.errors.is_empty(),
            [
                ("vpcs", y.vpcs.len() as u64),
                ("subnets", y.subnets.len() as u64),
                ("instances", y.instances.len() as u64),
                ("security_groups", y.security_groups.len() as u64),
                ("databases", y.db_instances.len() as u64),
                ("functions", y.functions.len() as u64),
                ("containers", y.ecs_services.len() as u64),
                ("clusters", y.eks_clusters.len() as u64),
            ],
        );
        for error in y.errors {
            session.record_dead_end(&error, serde_json::json!({"region": region}));
            result.errors.push(error);
        }
    }

    fn normalize_global(
        &self,
        ctx: &ScanContext,
        session: &mut EngramSession,
        result: &mut SyncResult,
        users: Result<Vec<AwsIamUser>, SentinelError>,
        roles: Result<Vec<AwsIamRole>, SentinelError>,
        buckets: Result<Vec<AwsBucket>, SentinelError>,
    ) {
        let tenant_id = ctx.tenant_id;
        let now = ctx.now;

        match users {
            Ok(users) => {
                let count = users.len() as u64;
                for u in users {
                    let mut user = User {
                        id: NodeId(uuid::Uuid::nil()),
                        tenant_id,
                        username: u.user_name.clone(),
                        display_name: Some(u.arn.clone()),
                        email: None,
                        user_type: UserType::Human,
                        source: IdentitySource::AwsIam,
                        enabled: true,
                        mfa_enabled: u.mfa_enabled,
                        last_login: None,
                        first_seen: now,
                        last_seen: now,
                    };
                    user.id = NodeId::from_natural_key(&tenant_id, "User", &user.natural_key());
                    result.users.push(user);
                }
                session.record_action("list_iam_users", "iam", true, [("users", count)]);
            }
            Err(e) => {
                let error = format!("iam/users: {e}");
                session.record_dead_end(&error, serde_json::json!({"service": "iam"}));
                result.errors.push(error);
            }
        }

        match roles {
            Ok(roles) => {
                let count = roles.len() as u64;
                for r in roles {
                    let mut role = Role {
                        id: NodeId(uuid::Uuid::nil()),
                        tenant_id,
                        name: r.role_name.clone(),
                        description: r.description.clone(),
                        source: IdentitySource::AwsIam,
                        permissions: vec![],
                        first_seen: now,
                        last_seen: now,
                    };
                    role.id = NodeId::from_natural_key(&tenant_id, "Role", &role.natural_key());
                    result.roles.push(role);
                }
                session.record_action("list_iam_roles", "iam", true, [("roles", count)]);
            }
            Err(e) => {
                let error = format!("iam/roles: {e}");
                session.record_dead_end(&error, serde_json::json!({"service": "iam"}));
                result.errors.push(error);
            }
        }

        match buckets {
            Ok(buckets) => {
                let count = buckets.len() as u64;
                for b in buckets {
                    let mut app = Application {
                        id: NodeId(uuid::Uuid::nil()),
                        tenant_id,
                        name: b.name.clone(),
                        version: None,
                        app_type: AppType::Bucket,
                        first_seen: now,
                        last_seen: now,
                    };
                    app.id =
                        NodeId::from_natural_key(&tenant_id, "Application", &app.natural_key());
                    result.applications.push(app);
                }
                session.record_action("list_buckets", "s3", true, [("buckets", count)]);
            }
            Err(e) => {
                let error = format!("s3/buckets: {e}");
                session.record_dead_end(&error, serde_json::json!({"service": "s3"}));
                result.errors.push(error);
            }
        }
    }
}

fn sg_policy_id(
    tenant_id: &sentinel_core::types::TenantId,
    groups: &[AwsSecurityGroup],
    group_id: &str,
) -> Option<NodeId> {
    groups.iter().find(|g| g.group_id == group_id).map(|g| {
        NodeId::from_natural_key(
            tenant_id,
            "Policy",
            &format!("policy:aws:{}:{}", g.group_id, g.group_name),
        )
    })
}

#[async_trait]
impl Connector for AwsConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Aws
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn health_check(&self, _ctx: &ScanContext, _creds: &Secret) -> Result<(), SentinelError> {
        self.limiter.acquire().await;
        let identity =
            with_retry(&self.config.retry, "sts:GetCallerIdentity", || {
                self.api.caller_identity()
            })
            .await?;
        tracing::debug!(connector = %self.name, account = %identity, "AWS health check passed");
        Ok(())
    }

    async fn discover(
        &self,
        ctx: &ScanContext,
        _creds: &Secret,
        session: &mut EngramSession,
    ) -> Result<SyncResult, SentinelError> {
        let regions = self.config.regions_or("us-east-1");
        session.record_decision(
            "region enumeration",
            &["all partition regions", "configured regions only"],
            "configured regions only",
            "operators scope discovery to the regions they own",
        );

        // Enumeration fans out per region; normalization stays on this
        // task so records land in order.
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let mut tasks: JoinSet<RegionYield> = JoinSet::new();
        for region in regions {
            ctx.check_cancelled()?;
            let api = self.api.clone();
            let limiter = self.limiter.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                Self::enumerate_region(api, limiter, config, region).await
            });
        }

        let mut yields = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            ctx.check_cancelled()?;
            match joined {
                Ok(y) => yields.push(y),
                Err(e) => {
                    return Err(SentinelError::Internal(format!(
                        "region enumeration task failed: {e}"
                    )))
                }
            }
        }
        // Join order is completion order; normalize deterministically.
        yields.sort_by(|a, b| a.region.cmp(&b.region));

        let mut result = SyncResult::default();
        for y in yields {
            ctx.check_cancelled()?;
            self.normalize_region(ctx, session, &mut result, y);
        }

        // Account-global services.
        ctx.check_cancelled()?;
        let users = if self.config.kind_enabled("iam_users") {
            self.limiter.acquire().await;
            with_retry(&self.config.retry, "iam:ListUsers", || self.api.list_iam_users()).await
        } else {
            Ok(vec![])
        };
        let roles = if self.config.kind_enabled("iam_roles") {
            self.limiter.acquire().await;
            with_retry(&self.config.retry, "iam:ListRoles", || self.api.list_iam_roles()).await
        } else {
            Ok(vec![])
        };
        let buckets = if self.config.kind_enabled("buckets") {
            self.limiter.acquire().await;
            with_retry(&self.config.retry, "s3:ListBuckets", || self.api.list_buckets()).await
        } else {
            Ok(vec![])
        };
        self.normalize_global(ctx, session, &mut result, users, roles, buckets);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::types::TenantId;
    use sentinel_engram::SessionOutcome;

    pub(crate) struct FakeAwsApi {
        pub fail_instances: bool,
    }

    #[async_trait]
    impl AwsApi for FakeAwsApi {
        async fn caller_identity(&self) -> Result<String, SentinelError> {
            Ok("123456789012".to_string())
        }

        async fn describe_vpcs(&self, _region: &str) -> Result<Vec<AwsVpc>, SentinelError> {
            Ok(vec![AwsVpc {
                vpc_id: "vpc-x".to_string(),
                cidr: Some("10.0.0.0/16".to_string()),
                name: Some("main".to_string()),
            }])
        }

        async fn describe_subnets(&self, _region: &str) -> Result<Vec<AwsSubnet>, SentinelError> {
            Ok(vec![AwsSubnet {
                subnet_id: "subnet-1".to_string(),
                vpc_id: "vpc-x".to_string(),
                cidr: "10.0.0.0/24".to_string(),
                name: None,
                public: false,
            }])
        }

        async fn describe_instances(
            &self,
            _region: &str,
        ) -> Result<Vec<AwsInstance>, SentinelError> {
            if self.fail_instances {
                return Err(SentinelError::Internal("HTTP 403".to_string()));
            }
            Ok(vec![
                AwsInstance {
                    instance_id: "i-1".to_string(),
                    private_ip: Some("10.0.0.1".to_string()),
                    name: Some("web-1".to_string()),
                    platform: None,
                    subnet_id: Some("subnet-1".to_string()),
                    security_group_ids: vec!["sg-1".to_string()],
                    tags: vec!["web".to_string()],
                },
                AwsInstance {
                    instance_id: "i-2".to_string(),
                    private_ip: Some("10.0.0.2".to_string()),
                    name: Some("web-2".to_string()),
                    platform: None,
                    subnet_id: Some("subnet-1".to_string()),
                    security_group_ids: vec![],
                    tags: vec![],
                },
            ])
        }

        async fn describe_security_groups(
            &self,
            _region: &str,
        ) -> Result<Vec<AwsSecurityGroup>, SentinelError> {
            Ok(vec![AwsSecurityGroup {
                group_id: "sg-1".to_string(),
                group_name: "web-sg".to_string(),
                rules_json: Some("[]".to_string()),
            }])
        }

        async fn describe_db_instances(
            &self,
            _region: &str,
        ) -> Result<Vec<AwsDbInstance>, SentinelError> {
            Ok(vec![AwsDbInstance {
                identifier: "orders-db".to_string(),
                engine: Some("postgres".to_string()),
                port: 5432,
                available: true,
                vpc_id: Some("vpc-x".to_string()),
                security_group_ids: vec!["sg-1".to_string()],
            }])
        }

        async fn list_functions(
            &self,
            _region: &str,
        ) -> Result<Vec<AwsLambdaFunction>, SentinelError> {
            Ok(vec![AwsLambdaFunction {
                function_name: "billing-worker".to_string(),
                runtime: Some("python3.12".to_string()),
                role_name: Some("billing-role".to_string()),
            }])
        }

        async fn list_ecs_services(
            &self,
            _region: &str,
        ) -> Result<Vec<AwsEcsService>, SentinelError> {
            Ok(vec![])
        }

        async fn list_eks_clusters(
            &self,
            _region: &str,
        ) -> Result<Vec<AwsEksCluster>, SentinelError> {
            Ok(vec![])
        }

        async fn list_iam_users(&self) -> Result<Vec<AwsIamUser>, SentinelError> {
            Ok(vec![AwsIamUser {
                user_name: "alice".to_string(),
                arn: "arn:aws:iam::123456789012:user/alice".to_string(),
                mfa_enabled: Some(true),
            }])
        }

        async fn list_iam_roles(&self) -> Result<Vec<AwsIamRole>, SentinelError> {
            Ok(vec![AwsIamRole {
                role_name: "billing-role".to_string(),
                arn: "arn:aws:iam::123456789012:role/billing-role".to_string(),
                description: None,
            }])
        }

        async fn list_buckets(&self) -> Result<Vec<AwsBucket>, SentinelError> {
            Ok(vec![AwsBucket {
                name: "audit-logs".to_string(),
            }])
        }
    }

    fn connector(fail_instances: bool, max_parallelism: usize) -> AwsConnector {
        let config = ConnectorConfig {
            regions: vec!["us-east-1".to_string(), "eu-west-1".to_string()],
            max_parallelism,
            ..Default::default()
        };
        AwsConnector::new("aws-test", config, Arc::new(FakeAwsApi { fail_instances }))
    }

    fn open_session(tenant: TenantId) -> EngramSession {
        EngramSession::open(tenant.0, "connector/aws-test", "test", serde_json::Value::Null)
    }

    fn sorted_keys(result: &SyncResult) -> Vec<String> {
        let mut keys: Vec<String> = result
            .hosts
            .iter()
            .map(|h| h.natural_key())
            .chain(result.services.iter().map(|s| s.natural_key()))
            .chain(result.vpcs.iter().map(|v| v.natural_key()))
            .chain(result.subnets.iter().map(|s| s.natural_key()))
            .chain(result.policies.iter().map(|p| p.natural_key()))
            .chain(result.applications.iter().map(|a| a.natural_key()))
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn discovers_and_links_assets() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let connector = connector(false, 4);
        let mut session = open_session(tenant);

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        // Two regions, identical fake source.
        assert_eq!(result.vpcs.len(), 2);
        assert_eq!(result.hosts.len(), 4);
        assert_eq!(result.services.len(), 2);
        assert_eq!(result.users.len(), 1);
        assert_eq!(result.roles.len(), 1);
        assert!(result.errors.is_empty());

        // Instance i-1 is placed in its subnet and exposed by sg-1.
        let has_subnet_edge = result.edges.iter().any(|e| {
            e.edge_type == EdgeType::BelongsToSubnet
                && e.source_id
                    == NodeId::from_natural_key(&tenant, "Host", "host:i-1")
        });
        assert!(has_subnet_edge);

        let exposes = result
            .edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Exposes)
            .count();
        assert!(exposes >= 2); // instance + database, per region

        // Lambda is wired to its IAM role.
        let role_id = NodeId::from_natural_key(&tenant, "Role", "role:aws_iam:billing-role");
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::HasAccess && e.target_id == role_id));

        let engram = session.close(SessionOutcome::Success, "test");
        assert!(engram.action_count() > 0);
    }

    #[tokio::test]
    async fn sub_failure_degrades_to_partial_not_abort() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let connector = connector(true, 4);
        let mut session = open_session(tenant);

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        // Instances failed per region; everything else landed.
        assert_eq!(result.hosts.len(), 0);
        assert_eq!(result.vpcs.len(), 2);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.status(), crate::base::SyncStatus::Partial);
        assert!(session.dead_end_count() >= 2);

        drop(session);
    }

    #[tokio::test]
    async fn parallelism_does_not_change_the_result() {
        let tenant = TenantId::new();
        let now = Utc::now();

        let mut results = Vec::new();
        for parallelism in [1usize, 32] {
            let ctx = ScanContext::new(tenant, now);
            let connector = connector(false, parallelism);
            let mut session = open_session(tenant);
            let result = connector
                .discover(&ctx, &Secret::default(), &mut session)
                .await
                .unwrap();
            results.push(sorted_keys(&result));
            drop(session);
        }

        assert_eq!(results[0], results[1]);
    }

    #[tokio::test]
    async fn include_exclude_scopes_enumeration() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        let config = ConnectorConfig {
            regions: vec!["us-east-1".to_string()],
            exclude: vec!["databases".to_string(), "buckets".to_string()],
            ..Default::default()
        };
        let connector =
            AwsConnector::new("aws-test", config, Arc::new(FakeAwsApi { fail_instances: false }));
        let mut session = open_session(tenant);

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await
            .unwrap();

        assert!(result.services.is_empty());
        assert!(result
            .applications
            .iter()
            .all(|a| a.app_type != AppType::Bucket));
        drop(session);
    }

    #[tokio::test]
    async fn cancellation_stops_between_batches() {
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());
        ctx.cancel_flag().cancel();
        let connector = connector(false, 4);
        let mut session = open_session(tenant);

        let result = connector
            .discover(&ctx, &Secret::default(), &mut session)
            .await;
        assert!(matches!(result, Err(SentinelError::Cancelled)));
        drop(session);
    }
}
