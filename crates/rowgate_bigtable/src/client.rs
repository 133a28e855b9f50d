#![forbid(unsafe_code)]

use std::fmt;
use std::io::Read;

use rowgate_contracts::cells::{RowMutation, StoredRow};
use rowgate_contracts::row::RowPrefix;
use rowgate_contracts::table::{ColumnFamilySpec, TableId};
use rowgate_contracts::Validate;
use rowgate_storage::{StorageError, TableStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::codec::{
    decode_read_rows, map_status_error, CreateTableRequest, ErrorTarget,
    ModifyColumnFamiliesRequest, MutateRowRequest, ReadRowsRequest,
};
use crate::config::{build_http_agent, BigtableConfig};
use crate::merge::merge_chunks;

/// [`TableStore`] backed by Cloud Bigtable.
///
/// The underlying agent pools connections and is safe to share across
/// threads, so one client serves every request.
pub struct BigtableRestClient {
    config: BigtableConfig,
    agent: ureq::Agent,
    tokens: TokenProvider,
}

impl fmt::Debug for BigtableRestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigtableRestClient")
            .field("instance", &self.config.instance_name())
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl BigtableRestClient {
    pub fn new(config: BigtableConfig) -> Result<Self, StorageError> {
        let agent = build_http_agent(config.timeout_ms, &config.user_agent)
            .map_err(StorageError::transport)?;
        let tokens = TokenProvider::new(
            config.credentials.clone(),
            agent.clone(),
            &config.metadata_endpoint,
        );
        Ok(Self {
            config,
            agent,
            tokens,
        })
    }

    pub fn config(&self) -> &BigtableConfig {
        &self.config
    }

    fn authorize(&self, request: ureq::Request) -> Result<ureq::Request, StorageError> {
        Ok(match self.tokens.bearer()? {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        })
    }

    fn call_empty(
        &self,
        request: ureq::Request,
        target: ErrorTarget<'_>,
    ) -> Result<ureq::Response, StorageError> {
        let request = self.authorize(request)?;
        finish_call(request.call(), target)
    }

    fn call_json<B: Serialize>(
        &self,
        request: ureq::Request,
        body: &B,
        target: ErrorTarget<'_>,
    ) -> Result<ureq::Response, StorageError> {
        let request = self
            .authorize(request)?
            .set("Content-Type", "application/json");
        finish_call(request.send_json(body), target)
    }
}

fn finish_call(
    result: Result<ureq::Response, ureq::Error>,
    target: ErrorTarget<'_>,
) -> Result<ureq::Response, StorageError> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, response)) => {
            let body = match response.into_string() {
                Ok(body) => body,
                Err(err) => {
                    warn!(status, error = %err, "failed to read error response body");
                    format!("unreadable error body: {err}")
                }
            };
            Err(map_status_error(status, &body, target))
        }
        Err(ureq::Error::Transport(transport)) => Err(StorageError::transport(format!(
            "{:?}: {}",
            transport.kind(),
            transport
        ))),
    }
}

/// Decodes a whole read-rows reply. The body is read through the raw
/// reader since a full prefix scan can exceed `into_string`'s size cap.
fn scanned_rows(response: ureq::Response) -> Result<Vec<StoredRow>, StorageError> {
    let mut raw = String::new();
    response
        .into_reader()
        .read_to_string(&mut raw)
        .map_err(|e| StorageError::transport(format!("reading read rows body: {e}")))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    merge_chunks(decode_read_rows(&raw)?)
}

impl TableStore for BigtableRestClient {
    fn table_exists(&self, table: &TableId) -> Result<bool, StorageError> {
        let url = self.config.admin_url(&self.config.table_name(table));
        let request = self.agent.get(&url).query("view", "NAME_ONLY");
        match self.call_empty(request, ErrorTarget::Table(table)) {
            Ok(_) => Ok(true),
            Err(StorageError::TableNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn create_table(&self, table: &TableId) -> Result<(), StorageError> {
        let url = self
            .config
            .admin_url(&format!("{}/tables", self.config.instance_name()));
        self.call_json(
            self.agent.post(&url),
            &CreateTableRequest::new(table),
            ErrorTarget::Table(table),
        )?;
        info!(table = %table, "bigtable table created");
        Ok(())
    }

    fn create_column_family(
        &self,
        table: &TableId,
        family: &ColumnFamilySpec,
    ) -> Result<(), StorageError> {
        family.name.validate()?;
        let url = self.config.admin_url(&format!(
            "{}:modifyColumnFamilies",
            self.config.table_name(table)
        ));
        self.call_json(
            self.agent.post(&url),
            &ModifyColumnFamiliesRequest::create(family),
            ErrorTarget::Family(table, family.name.as_str()),
        )?;
        info!(table = %table, family = %family.name, "bigtable column family created");
        Ok(())
    }

    fn delete_table(&self, table: &TableId) -> Result<(), StorageError> {
        let url = self.config.admin_url(&self.config.table_name(table));
        self.call_empty(self.agent.delete(&url), ErrorTarget::Table(table))?;
        info!(table = %table, "bigtable table deleted");
        Ok(())
    }

    fn mutate_row(&self, table: &TableId, mutation: &RowMutation) -> Result<(), StorageError> {
        mutation.validate()?;
        let url = self
            .config
            .data_url(&format!("{}:mutateRow", self.config.table_name(table)));
        self.call_json(
            self.agent.post(&url),
            &MutateRowRequest::from(mutation),
            ErrorTarget::Rows(table),
        )?;
        debug!(table = %table, row_key = %mutation.row_key, cells = mutation.cells.len(), "row mutated");
        Ok(())
    }

    fn read_rows(
        &self,
        table: &TableId,
        prefix: &RowPrefix,
    ) -> Result<Vec<StoredRow>, StorageError> {
        let url = self
            .config
            .data_url(&format!("{}:readRows", self.config.table_name(table)));
        let response = self.call_json(
            self.agent.post(&url),
            &ReadRowsRequest::prefix(prefix),
            ErrorTarget::Rows(table),
        )?;
        let rows = scanned_rows(response)?;
        debug!(table = %table, rows = rows.len(), "prefix scan complete");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialSource;
    use rowgate_contracts::table::{InstanceId, ProjectId};

    fn client(timeout_ms: u32) -> Result<BigtableRestClient, StorageError> {
        let mut config = BigtableConfig::new(
            ProjectId::new("demo-project").unwrap(),
            InstanceId::new("hono-bigtable").unwrap(),
        );
        config.credentials = CredentialSource::Anonymous;
        config.timeout_ms = timeout_ms;
        BigtableRestClient::new(config)
    }

    #[test]
    fn at_bt_client_01_builds_with_valid_config() {
        let c = client(5_000).unwrap();
        assert_eq!(
            c.config().instance_name(),
            "projects/demo-project/instances/hono-bigtable"
        );
        assert!(format!("{c:?}").contains("hono-bigtable"));
    }

    #[test]
    fn at_bt_client_02_zero_timeout_rejected() {
        assert!(matches!(client(0), Err(StorageError::Transport(_))));
    }

    #[test]
    fn at_bt_client_03_status_errors_map_by_target() {
        let t = TableId::new("hono").unwrap();
        let body = r#"{"error":{"code":404,"message":"table not found","status":"NOT_FOUND"}}"#;
        let response = ureq::Response::new(404, "Not Found", body).unwrap();
        assert!(matches!(
            finish_call(Err(ureq::Error::Status(404, response)), ErrorTarget::Table(&t)),
            Err(StorageError::TableNotFound { .. })
        ));

        let body = r#"{"error":{"code":409,"message":"exists","status":"ALREADY_EXISTS"}}"#;
        let response = ureq::Response::new(409, "Conflict", body).unwrap();
        assert!(matches!(
            finish_call(Err(ureq::Error::Status(409, response)), ErrorTarget::Table(&t)),
            Err(StorageError::TableAlreadyExists { .. })
        ));
    }

    #[test]
    fn at_bt_client_04_scan_reply_over_ten_megabytes_is_read_in_full() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        const ROWS: usize = 80_000;
        let qualifier = STANDARD.encode("value");
        let messages: Vec<String> = (0..ROWS)
            .map(|i| {
                let key = STANDARD.encode(format!("data#{i:08}"));
                let value = STANDARD.encode(format!("{i:08}"));
                format!(
                    r#"{{"chunks":[{{"rowKey":"{key}","familyName":"stats","qualifier":"{qualifier}","timestampMicros":"1000","value":"{value}","commitRow":true}}]}}"#
                )
            })
            .collect();
        let body = format!("[{}]", messages.join(","));
        assert!(body.len() > 10 * 1024 * 1024);

        let response = ureq::Response::new(200, "OK", &body).unwrap();
        let rows = scanned_rows(response).unwrap();
        assert_eq!(rows.len(), ROWS);
        assert_eq!(rows[0].key, b"data#00000000".to_vec());
        assert_eq!(
            rows[ROWS - 1].latest("stats", b"value").unwrap().value,
            format!("{:08}", ROWS - 1).into_bytes()
        );
    }

    #[test]
    fn at_bt_client_05_empty_scan_reply_is_no_rows() {
        let response = ureq::Response::new(200, "OK", "").unwrap();
        assert!(scanned_rows(response).unwrap().is_empty());
        let response = ureq::Response::new(200, "OK", "[]").unwrap();
        assert!(scanned_rows(response).unwrap().is_empty());
    }
}
