//! Lazily loaded, process-lifetime schema.
//!
//! The schema file is compiled on first use only, off the async workers.
//! Concurrent callers share one load; a failed load stores nothing, so the
//! next caller tries again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::ClientConfig;
use crate::error::SchemaError;
use crate::logger::ClientLogger;
use crate::schema::Schema;

#[derive(Debug)]
pub struct SchemaRegistry {
    path: PathBuf,
    message_type: String,
    schema: OnceCell<Arc<Schema>>,
    logger: ClientLogger,
}

impl SchemaRegistry {
    pub fn new(path: impl Into<PathBuf>, message_type: impl Into<String>, logger: ClientLogger) -> Self {
        Self {
            path: path.into(),
            message_type: message_type.into(),
            schema: OnceCell::new(),
            logger,
        }
    }

    pub fn from_config(config: &ClientConfig, logger: ClientLogger) -> Self {
        Self::new(config.schema_path.clone(), config.message_type.clone(), logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the schema, loading it if this is the first successful call.
    pub async fn ensure_loaded(&self) -> Result<Arc<Schema>, SchemaError> {
        let schema = self
            .schema
            .get_or_try_init(|| async {
                self.logger.debug(format_args!("Loading schema from {}", self.path.display()));
                let path = self.path.clone();
                let message_type = self.message_type.clone();
                let schema = tokio::task::spawn_blocking(move || Schema::load(&path, &message_type))
                    .await
                    .map_err(|e| SchemaError::Compile(format!("schema loader stopped: {}", e)))?
                    .inspect_err(|e| {
                        self.logger.error(format_args!("Schema {} rejected: {}", self.path.display(), e));
                    })?;
                self.logger.info(format_args!(
                    "Schema loaded: message '{}' with {} fields",
                    schema.message().full_name(),
                    schema.field_count()
                ));
                Ok::<_, SchemaError>(Arc::new(schema))
            })
            .await?;
        Ok(Arc::clone(schema))
    }

    pub fn is_loaded(&self) -> bool {
        self.schema.initialized()
    }

    /// The schema if already loaded.
    pub fn get(&self) -> Option<Arc<Schema>> {
        self.schema.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_schema_path;
    use std::io::Write;

    #[tokio::test]
    async fn test_loads_bundled_schema_once() {
        let registry = SchemaRegistry::new(default_schema_path(), "yticker", ClientLogger::silent());
        assert!(!registry.is_loaded());

        let first = registry.ensure_loaded().await.unwrap();
        let second = registry.ensure_loaded().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_loaded());
        assert!(first.field("dayVolume").is_some());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_registry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.proto");
        let registry = SchemaRegistry::new(&path, "yticker", ClientLogger::silent());

        let err = registry.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
        assert!(registry.get().is_none());

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "syntax = \"proto3\";\nmessage yticker {{ string id = 1; }}").unwrap();
        drop(file);

        let schema = registry.ensure_loaded().await.unwrap();
        assert_eq!(schema.field_count(), 1);
    }

    #[tokio::test]
    async fn test_compile_error_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.proto");
        std::fs::write(&path, "syntax = \"proto3\";\nmessage yticker { Unknown id = 1; }").unwrap();
        let registry = SchemaRegistry::new(&path, "yticker", ClientLogger::silent());

        assert!(matches!(registry.ensure_loaded().await.unwrap_err(), SchemaError::Compile(_)));
        assert!(!registry.is_loaded());

        std::fs::write(&path, "syntax = \"proto3\";\nmessage yticker { string id = 1; }").unwrap();
        assert_eq!(registry.ensure_loaded().await.unwrap().field_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_message_type_is_reported() {
        let registry = SchemaRegistry::new(default_schema_path(), "quotes", ClientLogger::silent());
        let err = registry.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, SchemaError::MissingMessage(name) if name == "quotes"));
    }
}
