use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use marketsync_core::{
    Aggregate, AggregateRoot, Decision, DecisionContext, DomainError, DomainResult,
    LifecycleStatus, PartitionKey, validation,
};
use marketsync_events::Event;

use crate::event::ApplicationEvent;
use crate::generator::ApplicationEventContentGenerator;
use crate::model::{
    Api, ApiProperties, ApiVersionProperties, ApplicationProperties, MasterKeyValues, MasterKeys,
};

/// Aggregate root: published application with its APIs and their versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    name: PartitionKey,
    status: LifecycleStatus,
    properties: ApplicationProperties,
    master_keys: MasterKeys,
    #[serde(default)]
    apis: BTreeMap<String, Api>,
}

impl Application {
    pub fn new(name: PartitionKey, properties: ApplicationProperties, master_keys: MasterKeys) -> Self {
        Self {
            name,
            status: LifecycleStatus::Draft,
            properties,
            master_keys,
            apis: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: LifecycleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn name(&self) -> &PartitionKey {
        &self.name
    }

    pub fn properties(&self) -> &ApplicationProperties {
        &self.properties
    }

    pub fn master_keys(&self) -> &MasterKeys {
        &self.master_keys
    }

    pub fn api(&self, name: &str) -> Option<&Api> {
        self.apis.get(name)
    }

    pub fn apis(&self) -> impl Iterator<Item = &Api> {
        self.apis.values()
    }
}

impl AggregateRoot for Application {
    fn partition_key(&self) -> &PartitionKey {
        &self.name
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationCommand {
    CreateApplication {
        name: PartitionKey,
        properties: ApplicationProperties,
        master_keys: MasterKeyValues,
    },
    UpdateApplication {
        name: PartitionKey,
        properties: ApplicationProperties,
    },
    PublishApplication {
        name: PartitionKey,
        comments: String,
    },
    DeleteApplication {
        name: PartitionKey,
    },
    RegenerateMasterKeys {
        name: PartitionKey,
        master_keys: MasterKeyValues,
    },
    CreateApi {
        application_name: PartitionKey,
        api_name: String,
        properties: ApiProperties,
    },
    UpdateApi {
        application_name: PartitionKey,
        api_name: String,
        properties: ApiProperties,
    },
    DeleteApi {
        application_name: PartitionKey,
        api_name: String,
    },
    CreateApiVersion {
        application_name: PartitionKey,
        api_name: String,
        version_name: String,
        properties: ApiVersionProperties,
    },
    UpdateApiVersion {
        application_name: PartitionKey,
        api_name: String,
        version_name: String,
        properties: ApiVersionProperties,
    },
    DeleteApiVersion {
        application_name: PartitionKey,
        api_name: String,
        version_name: String,
    },
}

impl Aggregate for Application {
    type Command = ApplicationCommand;
    type Event = ApplicationEvent;

    const AGGREGATE_TYPE: &'static str = "applications.application";

    fn target(command: &ApplicationCommand) -> &PartitionKey {
        match command {
            ApplicationCommand::CreateApplication { name, .. }
            | ApplicationCommand::UpdateApplication { name, .. }
            | ApplicationCommand::PublishApplication { name, .. }
            | ApplicationCommand::DeleteApplication { name }
            | ApplicationCommand::RegenerateMasterKeys { name, .. } => name,
            ApplicationCommand::CreateApi {
                application_name, ..
            }
            | ApplicationCommand::UpdateApi {
                application_name, ..
            }
            | ApplicationCommand::DeleteApi {
                application_name, ..
            }
            | ApplicationCommand::CreateApiVersion {
                application_name, ..
            }
            | ApplicationCommand::UpdateApiVersion {
                application_name, ..
            }
            | ApplicationCommand::DeleteApiVersion {
                application_name, ..
            } => application_name,
        }
    }

    fn is_genesis(event: &ApplicationEvent) -> bool {
        matches!(event, ApplicationEvent::ApplicationCreated(_))
    }

    fn apply(state: Option<Self>, event: &ApplicationEvent) -> DomainResult<Self> {
        if let ApplicationEvent::ApplicationCreated(e) = event {
            return Ok(e.application.clone());
        }

        let mut app = state.ok_or_else(|| {
            DomainError::invariant(format!(
                "'{}' applied to application '{}' with no history",
                event.event_type(),
                event.partition_key()
            ))
        })?;
        if event.partition_key() != &app.name {
            return Err(DomainError::invariant(format!(
                "event for application '{}' applied to application '{}'",
                event.partition_key(),
                app.name
            )));
        }

        match event {
            ApplicationEvent::ApplicationCreated(_) => {} // handled above
            ApplicationEvent::ApplicationUpdated(e) => app.properties = e.properties.clone(),
            ApplicationEvent::ApplicationPublished(e) => app = e.application.clone(),
            ApplicationEvent::ApplicationDeleted(_) => app.status = LifecycleStatus::Deleted,
            ApplicationEvent::MasterKeysRegenerated(e) => app.master_keys = e.master_keys.clone(),
            ApplicationEvent::ApiCreated(e) | ApplicationEvent::ApiUpdated(e) => {
                app.apis.insert(e.api.name.clone(), e.api.clone());
            }
            ApplicationEvent::ApiDeleted(e) => {
                app.apis.remove(&e.api_name);
            }
            ApplicationEvent::ApiVersionCreated(e) | ApplicationEvent::ApiVersionUpdated(e) => {
                let api = app.apis.get_mut(&e.api_name).ok_or_else(|| {
                    DomainError::invariant(format!(
                        "version '{}' written to missing API '{}'",
                        e.version.name, e.api_name
                    ))
                })?;
                api.versions.insert(e.version.name.clone(), e.version.clone());
            }
            ApplicationEvent::ApiVersionDeleted(e) => {
                if let Some(api) = app.apis.get_mut(&e.api_name) {
                    api.versions.remove(&e.version_name);
                }
            }
        }
        Ok(app)
    }

    fn handle(
        state: Option<&Self>,
        command: &ApplicationCommand,
        ctx: &DecisionContext,
    ) -> DomainResult<Decision<ApplicationEvent>> {
        match command {
            ApplicationCommand::CreateApplication {
                name,
                properties,
                master_keys,
            } => {
                if state.is_some_and(Application::is_active) {
                    return Err(DomainError::conflict(format!(
                        "application '{name}' already exists"
                    )));
                }
                properties.validate()?;
                Ok(ApplicationEventContentGenerator::create_application(
                    name,
                    properties,
                    master_keys,
                    ctx,
                ))
            }
            ApplicationCommand::UpdateApplication { name, properties } => {
                active(state, name)?;
                properties.validate()?;
                Ok(Decision::new(
                    ApplicationEventContentGenerator::update_application(name, properties),
                ))
            }
            ApplicationCommand::PublishApplication { name, comments } => {
                let app = active(state, name)?;
                validation::long_text("comments", comments)?;
                Ok(Decision::new(
                    ApplicationEventContentGenerator::publish_application(app, comments),
                ))
            }
            ApplicationCommand::DeleteApplication { name } => {
                let app = active(state, name)?;
                Ok(ApplicationEventContentGenerator::delete_application(app))
            }
            ApplicationCommand::RegenerateMasterKeys { name, master_keys } => {
                let app = active(state, name)?;
                Ok(ApplicationEventContentGenerator::regenerate_master_keys(
                    app,
                    master_keys,
                    ctx,
                ))
            }
            ApplicationCommand::CreateApi {
                application_name,
                api_name,
                properties,
            } => {
                let app = active(state, application_name)?;
                validation::object_name("api_name", api_name)?;
                if app.api(api_name).is_some() {
                    return Err(DomainError::conflict(format!(
                        "API '{api_name}' already exists in application '{application_name}'"
                    )));
                }
                properties.validate()?;
                Ok(Decision::new(ApplicationEventContentGenerator::create_api(
                    application_name,
                    api_name,
                    properties,
                )))
            }
            ApplicationCommand::UpdateApi {
                application_name,
                api_name,
                properties,
            } => {
                let app = active(state, application_name)?;
                let api = existing_api(app, api_name)?;
                properties.validate()?;
                if api.properties.api_type != properties.api_type {
                    return Err(DomainError::validation(format!(
                        "API '{api_name}' type cannot change from {:?} to {:?}",
                        api.properties.api_type, properties.api_type
                    )));
                }
                Ok(Decision::new(ApplicationEventContentGenerator::update_api(
                    application_name,
                    api,
                    properties,
                )))
            }
            ApplicationCommand::DeleteApi {
                application_name,
                api_name,
            } => {
                let app = active(state, application_name)?;
                existing_api(app, api_name)?;
                Ok(Decision::new(ApplicationEventContentGenerator::delete_api(
                    application_name,
                    api_name,
                )))
            }
            ApplicationCommand::CreateApiVersion {
                application_name,
                api_name,
                version_name,
                properties,
            } => {
                let app = active(state, application_name)?;
                let api = existing_api(app, api_name)?;
                validation::object_name("version_name", version_name)?;
                if api.version(version_name).is_some() {
                    return Err(DomainError::conflict(format!(
                        "version '{version_name}' already exists in API '{api_name}'"
                    )));
                }
                properties.validate(api.properties.api_type)?;
                Ok(Decision::new(
                    ApplicationEventContentGenerator::create_api_version(
                        application_name,
                        api_name,
                        version_name,
                        properties,
                    ),
                ))
            }
            ApplicationCommand::UpdateApiVersion {
                application_name,
                api_name,
                version_name,
                properties,
            } => {
                let app = active(state, application_name)?;
                let api = existing_api(app, api_name)?;
                let current = api
                    .version(version_name)
                    .ok_or_else(|| DomainError::not_found(format!("version '{version_name}'")))?;
                properties.validate(api.properties.api_type)?;
                if current.properties.version_type != properties.version_type {
                    return Err(DomainError::validation(format!(
                        "version '{version_name}' type cannot change from {:?} to {:?}",
                        current.properties.version_type, properties.version_type
                    )));
                }
                Ok(Decision::new(
                    ApplicationEventContentGenerator::update_api_version(
                        application_name,
                        api_name,
                        version_name,
                        properties,
                    ),
                ))
            }
            ApplicationCommand::DeleteApiVersion {
                application_name,
                api_name,
                version_name,
            } => {
                let app = active(state, application_name)?;
                let api = existing_api(app, api_name)?;
                if api.version(version_name).is_none() {
                    return Err(DomainError::not_found(format!("version '{version_name}'")));
                }
                Ok(Decision::new(
                    ApplicationEventContentGenerator::delete_api_version(
                        application_name,
                        api_name,
                        version_name,
                    ),
                ))
            }
        }
    }
}

fn active<'a>(state: Option<&'a Application>, name: &PartitionKey) -> DomainResult<&'a Application> {
    state
        .filter(|app| app.is_active())
        .ok_or_else(|| DomainError::not_found(format!("application '{name}'")))
}

fn existing_api<'a>(app: &'a Application, api_name: &str) -> DomainResult<&'a Api> {
    app.api(api_name)
        .ok_or_else(|| DomainError::not_found(format!("API '{api_name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiType, ApiVersionType};

    fn name() -> PartitionKey {
        PartitionKey::parse("scoring").unwrap()
    }

    fn ctx() -> DecisionContext {
        DecisionContext::new("dev@example.com")
    }

    fn props() -> ApplicationProperties {
        ApplicationProperties {
            owner_user_id: "owner".into(),
            display_name: "Scoring".into(),
            description: "Scores things".into(),
            documentation_url: "https://docs.example.com".into(),
            logo_image_url: "https://cdn.example.com/l.png".into(),
            publisher: "Contoso".into(),
            tags: vec![],
        }
    }

    fn api_props(api_type: ApiType) -> ApiProperties {
        ApiProperties {
            display_name: "Predict".into(),
            api_type,
            description: String::new(),
            advanced_settings: None,
        }
    }

    fn version_props(version_type: ApiVersionType) -> ApiVersionProperties {
        ApiVersionProperties {
            version_type,
            description: String::new(),
            advanced_settings: None,
            workspace_name: Some("ws".into()),
            endpoints: vec![],
        }
    }

    fn exec(state: Option<Application>, cmd: ApplicationCommand) -> DomainResult<Application> {
        let decision = Application::handle(state.as_ref(), &cmd, &ctx())?;
        Application::apply(state, &decision.event)
    }

    fn created() -> Application {
        exec(
            None,
            ApplicationCommand::CreateApplication {
                name: name(),
                properties: props(),
                master_keys: MasterKeyValues::generate(),
            },
        )
        .unwrap()
    }

    fn with_api() -> Application {
        exec(
            Some(created()),
            ApplicationCommand::CreateApi {
                application_name: name(),
                api_name: "predict".into(),
                properties: api_props(ApiType::Realtime),
            },
        )
        .unwrap()
    }

    #[test]
    fn create_rejects_active_duplicate() {
        let err = Application::handle(
            Some(&created()),
            &ApplicationCommand::CreateApplication {
                name: name(),
                properties: props(),
                master_keys: MasterKeyValues::generate(),
            },
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn publish_keeps_apis_and_marks_published() {
        let app = exec(
            Some(with_api()),
            ApplicationCommand::PublishApplication {
                name: name(),
                comments: "first release".into(),
            },
        )
        .unwrap();
        assert_eq!(app.status(), LifecycleStatus::Published);
        assert!(app.api("predict").is_some());
    }

    #[test]
    fn api_type_cannot_change() {
        let err = Application::handle(
            Some(&with_api()),
            &ApplicationCommand::UpdateApi {
                application_name: name(),
                api_name: "predict".into(),
                properties: api_props(ApiType::Pipeline),
            },
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn version_lifecycle_inside_api() {
        let app = exec(
            Some(with_api()),
            ApplicationCommand::CreateApiVersion {
                application_name: name(),
                api_name: "predict".into(),
                version_name: "v1".into(),
                properties: version_props(ApiVersionType::AzureMl),
            },
        )
        .unwrap();
        assert!(app.api("predict").unwrap().version("v1").is_some());

        let err = Application::handle(
            Some(&app),
            &ApplicationCommand::UpdateApiVersion {
                application_name: name(),
                api_name: "predict".into(),
                version_name: "v1".into(),
                properties: version_props(ApiVersionType::AzureDatabricks),
            },
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let app = exec(
            Some(app),
            ApplicationCommand::DeleteApiVersion {
                application_name: name(),
                api_name: "predict".into(),
                version_name: "v1".into(),
            },
        )
        .unwrap();
        assert!(app.api("predict").unwrap().version("v1").is_none());
    }

    #[test]
    fn version_on_missing_api_is_not_found() {
        let err = Application::handle(
            Some(&created()),
            &ApplicationCommand::CreateApiVersion {
                application_name: name(),
                api_name: "ghost".into(),
                version_name: "v1".into(),
                properties: version_props(ApiVersionType::AzureMl),
            },
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn delete_schedules_master_key_removal() {
        let app = created();
        let decision = Application::handle(
            Some(&app),
            &ApplicationCommand::DeleteApplication { name: name() },
            &ctx(),
        )
        .unwrap();
        let expected: Vec<String> = app
            .master_keys()
            .secret_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(decision.secret_deletes, expected);

        let deleted = Application::apply(Some(app), &decision.event).unwrap();
        assert_eq!(deleted.status(), LifecycleStatus::Deleted);
    }

    #[test]
    fn regenerate_replaces_key_references() {
        let app = created();
        let before = app.master_keys().clone();
        let after = exec(
            Some(app),
            ApplicationCommand::RegenerateMasterKeys {
                name: name(),
                master_keys: MasterKeyValues::generate(),
            },
        )
        .unwrap();
        assert_ne!(after.master_keys(), &before);
    }

    #[test]
    fn non_genesis_first_event_is_invariant_violation() {
        let event = ApplicationEventContentGenerator::delete_api(&name(), "predict");
        assert!(matches!(
            Application::apply(None, &event),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: any create/delete sequence of APIs replays to the same state from any cut.
            #[test]
            fn api_churn_replays_identically(
                ops in proptest::collection::vec((any::<bool>(), "a[0-2]"), 1..30),
                cut in 0usize..30,
            ) {
                let genesis = Application::handle(
                    None,
                    &ApplicationCommand::CreateApplication {
                        name: name(),
                        properties: props(),
                        master_keys: MasterKeyValues::generate(),
                    },
                    &ctx(),
                )
                .unwrap()
                .event;
                let mut state = Application::apply(None, &genesis).unwrap();
                let mut events = vec![genesis];

                for (create, api_name) in &ops {
                    let cmd = match (create, state.api(api_name).is_some()) {
                        (true, false) => ApplicationCommand::CreateApi {
                            application_name: name(),
                            api_name: api_name.clone(),
                            properties: api_props(ApiType::Realtime),
                        },
                        (false, true) => ApplicationCommand::DeleteApi {
                            application_name: name(),
                            api_name: api_name.clone(),
                        },
                        _ => continue,
                    };
                    let decision = Application::handle(Some(&state), &cmd, &ctx()).unwrap();
                    state = Application::apply(Some(state), &decision.event).unwrap();
                    events.push(decision.event);
                }

                let cut = cut.min(events.len());
                let fold = |start: Option<Application>, slice: &[ApplicationEvent]| {
                    slice.iter().try_fold(start, |s, e| Application::apply(s, e).map(Some)).unwrap()
                };
                let resumed = fold(fold(None, &events[..cut]), &events[cut..]);
                prop_assert_eq!(resumed, Some(state));
            }
        }
    }
}
