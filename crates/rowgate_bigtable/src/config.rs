#![forbid(unsafe_code)]

use std::time::Duration;

use rowgate_contracts::table::{InstanceId, ProjectId, TableId};

use crate::auth::CredentialSource;

pub const DEFAULT_ADMIN_ENDPOINT: &str = "https://bigtableadmin.googleapis.com";
pub const DEFAULT_DATA_ENDPOINT: &str = "https://bigtable.googleapis.com";
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";
pub const DEFAULT_TIMEOUT_MS: u32 = 30_000;

#[derive(Debug, Clone)]
pub struct BigtableConfig {
    pub project_id: ProjectId,
    pub instance_id: InstanceId,
    pub admin_endpoint: String,
    pub data_endpoint: String,
    pub metadata_endpoint: String,
    pub timeout_ms: u32,
    pub user_agent: String,
    pub credentials: CredentialSource,
}

impl BigtableConfig {
    pub fn new(project_id: ProjectId, instance_id: InstanceId) -> Self {
        Self {
            project_id,
            instance_id,
            admin_endpoint: DEFAULT_ADMIN_ENDPOINT.to_string(),
            data_endpoint: DEFAULT_DATA_ENDPOINT.to_string(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: format!("rowgate/{}", env!("CARGO_PKG_VERSION")),
            credentials: CredentialSource::MetadataServer,
        }
    }

    pub fn instance_name(&self) -> String {
        format!(
            "projects/{}/instances/{}",
            self.project_id.as_str(),
            self.instance_id.as_str()
        )
    }

    pub fn table_name(&self, table: &TableId) -> String {
        format!("{}/tables/{}", self.instance_name(), table.as_str())
    }

    pub fn admin_url(&self, resource: &str) -> String {
        format!("{}/v2/{}", self.admin_endpoint.trim_end_matches('/'), resource)
    }

    pub fn data_url(&self, resource: &str) -> String {
        format!("{}/v2/{}", self.data_endpoint.trim_end_matches('/'), resource)
    }
}

pub(crate) fn build_http_agent(timeout_ms: u32, user_agent: &str) -> Result<ureq::Agent, String> {
    if timeout_ms == 0 {
        return Err("timeout must be > 0".to_string());
    }
    let timeout = Duration::from_millis(u64::from(timeout_ms).max(100));
    Ok(ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(user_agent)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BigtableConfig {
        BigtableConfig::new(
            ProjectId::new("demo-project").unwrap(),
            InstanceId::new("hono-bigtable").unwrap(),
        )
    }

    #[test]
    fn at_bt_config_01_resource_names() {
        let c = config();
        let t = TableId::new("hono").unwrap();
        assert_eq!(c.instance_name(), "projects/demo-project/instances/hono-bigtable");
        assert_eq!(
            c.table_name(&t),
            "projects/demo-project/instances/hono-bigtable/tables/hono"
        );
    }

    #[test]
    fn at_bt_config_02_urls_tolerate_trailing_slash() {
        let mut c = config();
        c.admin_endpoint = "http://localhost:8086/".to_string();
        assert_eq!(
            c.admin_url("projects/p/instances/i/tables"),
            "http://localhost:8086/v2/projects/p/instances/i/tables"
        );
        assert_eq!(
            c.data_url("x:readRows"),
            "https://bigtable.googleapis.com/v2/x:readRows"
        );
    }

    #[test]
    fn at_bt_config_03_zero_timeout_rejected() {
        assert!(build_http_agent(0, "ua").is_err());
        assert!(build_http_agent(10, "ua").is_ok());
    }
}
