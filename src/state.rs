use std::sync::Arc;

use crate::config::AppConfig;
use crate::mailer::{self, Mailer};
use crate::storage::{Storage, StorageClient};
use crate::store::{CredentialStore, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init(config: Arc<AppConfig>, store: PgStore) -> anyhow::Result<Self> {
        // Real S3/MinIO
        let storage = Arc::new(Storage::new(&config.s3).await?) as Arc<dyn StorageClient>;
        let mailer = mailer::from_config(&config.mail)?;

        Ok(Self::from_parts(config, Arc::new(store), storage, mailer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            store,
            storage,
            mailer,
        }
    }
}
