//! Durable run checkpoint
//!
//! The run's identity, phase and progress live in one ConfigMap so that a
//! crashed run can still be cleaned up from its test id. The same record
//! receives the final results. One writer per record.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::{debug, info};

use canopy_common::run::TestRun;
use canopy_common::{Result, APP_LABEL_KEY, APP_LABEL_VALUE, RESULTS_RECORD_NAME};

/// String map stored under a name
pub type RecordData = BTreeMap<String, String>;

/// Keyed string-map storage
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a record; `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<RecordData>>;

    /// Create a record; fails with 409 if it exists
    async fn create(&self, name: &str, data: RecordData) -> Result<()>;

    /// Replace the whole content of an existing record
    async fn replace(&self, name: &str, data: RecordData) -> Result<()>;

    /// Delete a record; fails with 404 if it does not exist
    async fn delete(&self, name: &str) -> Result<()>;
}

/// [`RecordStore`] backed by ConfigMaps in one namespace
pub struct ConfigMapStore {
    api: Api<ConfigMap>,
    namespace: String,
}

impl ConfigMapStore {
    /// Store writing into `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl RecordStore for ConfigMapStore {
    async fn get(&self, name: &str) -> Result<Option<RecordData>> {
        match self.api.get(name).await {
            Ok(cm) => Ok(Some(cm.data.unwrap_or_default())),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, name: &str, data: RecordData) -> Result<()> {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    APP_LABEL_KEY.to_string(),
                    APP_LABEL_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        self.api.create(&PostParams::default(), &cm).await?;
        Ok(())
    }

    async fn replace(&self, name: &str, data: RecordData) -> Result<()> {
        let mut cm = self.api.get(name).await?;
        cm.data = Some(data);
        self.api.replace(name, &PostParams::default(), &cm).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Render an extra checkpoint value: strings verbatim, everything else as
/// its JSON text.
pub fn encode_extra(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Writes checkpoints and results into the run record
pub struct Checkpointer {
    store: Arc<dyn RecordStore>,
    record: String,
}

impl Checkpointer {
    /// Checkpointer writing the default record
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            record: RESULTS_RECORD_NAME.to_string(),
        }
    }

    /// Name of the record written
    pub fn record(&self) -> &str {
        &self.record
    }

    /// Overwrite the record with `data`, creating it if missing
    pub async fn upsert(&self, data: RecordData) -> Result<()> {
        match self.store.get(&self.record).await? {
            Some(_) => self.store.replace(&self.record, data).await,
            None => self.store.create(&self.record, data).await,
        }
    }

    /// Persist `{test_id, org_name, phase}` plus `extra`
    pub async fn save_checkpoint(
        &self,
        run: &TestRun,
        extra: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut data = identity(run);
        data.insert("phase".to_string(), run.phase().to_string());
        for (k, v) in extra {
            data.insert(k.clone(), encode_extra(v));
        }
        self.upsert(data).await?;
        info!(record = %self.record, phase = %run.phase(), "Saved checkpoint");
        Ok(())
    }

    /// Persist the final results alongside the run identity
    pub async fn save_results(
        &self,
        run: &TestRun,
        results_json: &str,
        report_html: &str,
    ) -> Result<()> {
        let mut data = identity(run);
        data.insert("results.json".to_string(), results_json.to_string());
        data.insert("report.html".to_string(), report_html.to_string());
        self.upsert(data).await?;
        info!(record = %self.record, "Saved results");
        Ok(())
    }

    /// Delete the record; an absent record is fine
    pub async fn remove(&self) -> Result<bool> {
        match self.store.delete(&self.record).await {
            Ok(()) => {
                info!(record = %self.record, "Deleted checkpoint record");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(record = %self.record, "Checkpoint record already gone");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn identity(run: &TestRun) -> RecordData {
    BTreeMap::from([
        ("test_id".to_string(), run.test_id().to_string()),
        ("org_name".to_string(), run.org_name().to_string()),
    ])
}
