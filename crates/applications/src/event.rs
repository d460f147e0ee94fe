//! Application events. APIs and versions are written whole; deletes carry names only.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use marketsync_core::PartitionKey;
use marketsync_events::{CodecError, DecoderTable, Event, EventCodec, encode_content};

use crate::application::Application;
use crate::model::{Api, ApiVersion, ApplicationProperties, MasterKeys};

pub const APPLICATION_CREATED: &str = "applications.application.created";
pub const APPLICATION_UPDATED: &str = "applications.application.updated";
pub const APPLICATION_PUBLISHED: &str = "applications.application.published";
pub const APPLICATION_DELETED: &str = "applications.application.deleted";
pub const MASTER_KEYS_REGENERATED: &str = "applications.application.master_keys_regenerated";
pub const API_CREATED: &str = "applications.api.created";
pub const API_UPDATED: &str = "applications.api.updated";
pub const API_DELETED: &str = "applications.api.deleted";
pub const API_VERSION_CREATED: &str = "applications.api_version.created";
pub const API_VERSION_UPDATED: &str = "applications.api_version.updated";
pub const API_VERSION_DELETED: &str = "applications.api_version.deleted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationCreated {
    pub application: Application,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationUpdated {
    pub name: PartitionKey,
    pub properties: ApplicationProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPublished {
    pub application: Application,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDeleted {
    pub name: PartitionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeysRegenerated {
    pub name: PartitionKey,
    pub master_keys: MasterKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiWritten {
    pub application_name: PartitionKey,
    pub api: Api,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDeleted {
    pub application_name: PartitionKey,
    pub api_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionWritten {
    pub application_name: PartitionKey,
    pub api_name: String,
    pub version: ApiVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionDeleted {
    pub application_name: PartitionKey,
    pub api_name: String,
    pub version_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationEvent {
    ApplicationCreated(ApplicationCreated),
    ApplicationUpdated(ApplicationUpdated),
    ApplicationPublished(ApplicationPublished),
    ApplicationDeleted(ApplicationDeleted),
    MasterKeysRegenerated(MasterKeysRegenerated),
    ApiCreated(ApiWritten),
    ApiUpdated(ApiWritten),
    ApiDeleted(ApiDeleted),
    ApiVersionCreated(ApiVersionWritten),
    ApiVersionUpdated(ApiVersionWritten),
    ApiVersionDeleted(ApiVersionDeleted),
}

impl Event for ApplicationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ApplicationEvent::ApplicationCreated(_) => APPLICATION_CREATED,
            ApplicationEvent::ApplicationUpdated(_) => APPLICATION_UPDATED,
            ApplicationEvent::ApplicationPublished(_) => APPLICATION_PUBLISHED,
            ApplicationEvent::ApplicationDeleted(_) => APPLICATION_DELETED,
            ApplicationEvent::MasterKeysRegenerated(_) => MASTER_KEYS_REGENERATED,
            ApplicationEvent::ApiCreated(_) => API_CREATED,
            ApplicationEvent::ApiUpdated(_) => API_UPDATED,
            ApplicationEvent::ApiDeleted(_) => API_DELETED,
            ApplicationEvent::ApiVersionCreated(_) => API_VERSION_CREATED,
            ApplicationEvent::ApiVersionUpdated(_) => API_VERSION_UPDATED,
            ApplicationEvent::ApiVersionDeleted(_) => API_VERSION_DELETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn partition_key(&self) -> &PartitionKey {
        match self {
            ApplicationEvent::ApplicationCreated(e) => e.application.name(),
            ApplicationEvent::ApplicationPublished(e) => e.application.name(),
            ApplicationEvent::ApplicationUpdated(e) => &e.name,
            ApplicationEvent::ApplicationDeleted(e) => &e.name,
            ApplicationEvent::MasterKeysRegenerated(e) => &e.name,
            ApplicationEvent::ApiCreated(e) | ApplicationEvent::ApiUpdated(e) => {
                &e.application_name
            }
            ApplicationEvent::ApiDeleted(e) => &e.application_name,
            ApplicationEvent::ApiVersionCreated(e) | ApplicationEvent::ApiVersionUpdated(e) => {
                &e.application_name
            }
            ApplicationEvent::ApiVersionDeleted(e) => &e.application_name,
        }
    }
}

impl EventCodec for ApplicationEvent {
    fn encode(&self) -> Result<JsonValue, CodecError> {
        let t = self.event_type();
        match self {
            ApplicationEvent::ApplicationCreated(e) => encode_content(t, e),
            ApplicationEvent::ApplicationUpdated(e) => encode_content(t, e),
            ApplicationEvent::ApplicationPublished(e) => encode_content(t, e),
            ApplicationEvent::ApplicationDeleted(e) => encode_content(t, e),
            ApplicationEvent::MasterKeysRegenerated(e) => encode_content(t, e),
            ApplicationEvent::ApiCreated(e) | ApplicationEvent::ApiUpdated(e) => {
                encode_content(t, e)
            }
            ApplicationEvent::ApiDeleted(e) => encode_content(t, e),
            ApplicationEvent::ApiVersionCreated(e) | ApplicationEvent::ApiVersionUpdated(e) => {
                encode_content(t, e)
            }
            ApplicationEvent::ApiVersionDeleted(e) => encode_content(t, e),
        }
    }

    fn decoder_table() -> DecoderTable<Self> {
        DecoderTable::new()
            .register(APPLICATION_CREATED, 1, ApplicationEvent::ApplicationCreated)
            .register(APPLICATION_UPDATED, 1, ApplicationEvent::ApplicationUpdated)
            .register(APPLICATION_PUBLISHED, 1, ApplicationEvent::ApplicationPublished)
            .register(APPLICATION_DELETED, 1, ApplicationEvent::ApplicationDeleted)
            .register(MASTER_KEYS_REGENERATED, 1, ApplicationEvent::MasterKeysRegenerated)
            .register(API_CREATED, 1, ApplicationEvent::ApiCreated)
            .register(API_UPDATED, 1, ApplicationEvent::ApiUpdated)
            .register(API_DELETED, 1, ApplicationEvent::ApiDeleted)
            .register(API_VERSION_CREATED, 1, ApplicationEvent::ApiVersionCreated)
            .register(API_VERSION_UPDATED, 1, ApplicationEvent::ApiVersionUpdated)
            .register(API_VERSION_DELETED, 1, ApplicationEvent::ApiVersionDeleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_table_covers_every_variant() {
        let table = ApplicationEvent::decoder_table();
        assert_eq!(table.len(), 11);
        assert!(table.contains(MASTER_KEYS_REGENERATED, 1));
        assert!(!table.contains(API_DELETED, 2));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let table = ApplicationEvent::decoder_table();
        let err = table
            .decode(
                APPLICATION_DELETED,
                7,
                serde_json::json!({"name": "scoring"}),
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownEventType { .. }));
    }

    #[test]
    fn api_deleted_round_trips_through_table() {
        let ev = ApplicationEvent::ApiDeleted(ApiDeleted {
            application_name: PartitionKey::parse("scoring").unwrap(),
            api_name: "predict".into(),
        });
        let decoded = ApplicationEvent::decoder_table()
            .decode(ev.event_type(), ev.version(), ev.encode().unwrap())
            .unwrap();
        assert_eq!(decoded, ev);
    }
}
