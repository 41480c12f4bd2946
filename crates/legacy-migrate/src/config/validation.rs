//! Configuration validation rules.

use super::types::Config;
use crate::error::{MigrateError, Result};

pub fn validate(config: &Config) -> Result<()> {
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host must not be empty".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config(
            "source.database must not be empty".into(),
        ));
    }
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host must not be empty".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config(
            "target.database must not be empty".into(),
        ));
    }
    if config.target.max_connections == 0 {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }
    if config.engine.batch_size == 0 {
        return Err(MigrateError::Config(
            "engine.batch_size must be at least 1".into(),
        ));
    }
    if config.jobs.workers == 0 {
        return Err(MigrateError::Config(
            "jobs.workers must be at least 1".into(),
        ));
    }
    if config.jobs.queue_depth == 0 {
        return Err(MigrateError::Config(
            "jobs.queue_depth must be at least 1".into(),
        ));
    }
    if config.jobs.binary_batch_size == 0 {
        return Err(MigrateError::Config(
            "jobs.binary_batch_size must be at least 1".into(),
        ));
    }
    if let Some(secs) = config.jobs.max_runtime_secs {
        if secs == 0 {
            return Err(MigrateError::Config(
                "jobs.max_runtime_secs must be at least 1 when set".into(),
            ));
        }
    }
    Ok(())
}
