mod service;
mod tasks;

pub use service::{
    hash_key, ApiKeyService, ApiKeyStats, CreatedKey, KeySettings, RequestContext, ValidatedKey,
    KEY_PREFIX,
};
pub use tasks::ApiKeyMaintenance;
