//! Remote advertising platform API abstraction.
//!
//! The actual HTTP client is abstracted via a trait so different
//! implementations (reqwest, hyper, mock for testing) can be injected.
//! Every call made by the engine goes through the rate limiter; the
//! trait itself knows nothing about throttling.

use crate::error::{EngineError, EngineResult};
use adsync_model::{EntityKind, LocalEntity};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// The scope of a remote query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteScope {
    /// Scoped to one network (advertisers, zones, advertisements).
    Network(u64),
    /// Scoped to one advertiser (campaigns).
    Advertiser(u64),
}

/// An entity as reported by the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    /// Remote numeric id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Remaining platform attributes, untyped.
    #[serde(default)]
    pub attributes: Value,
}

impl RemoteEntity {
    /// Creates a remote entity with no extra attributes.
    pub fn new(id: u64, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            attributes: Value::Null,
        }
    }

    /// Sets the platform attributes.
    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A create-request payload for the remote platform.
///
/// Payload builders translate local records into the platform's wire
/// shape: only non-default optional fields are included, and dates are
/// normalized to date-only strings before transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayload {
    /// Kind of entity to create.
    pub kind: EntityKind,
    /// JSON body of the request.
    pub body: Value,
}

impl CreatePayload {
    /// Returns the payload's `name` field, if present.
    pub fn name(&self) -> Option<&str> {
        self.body.get("name").and_then(Value::as_str)
    }

    /// Builds an advertiser create payload.
    pub fn advertiser(entity: &LocalEntity) -> EngineResult<Self> {
        let mut body = named_body(entity)?;
        if let adsync_model::EntityDetail::Advertiser { notes: Some(notes) } = &entity.detail {
            body.insert("notes".into(), json!(notes));
        }
        Ok(Self {
            kind: EntityKind::Advertiser,
            body: Value::Object(body),
        })
    }

    /// Builds a zone create payload.
    pub fn zone(entity: &LocalEntity) -> EngineResult<Self> {
        let mut body = named_body(entity)?;
        if let adsync_model::EntityDetail::Zone { alias, self_serve } = &entity.detail {
            if let Some(alias) = alias {
                body.insert("alias".into(), json!(alias));
            }
            if *self_serve {
                body.insert("self_serve".into(), json!(true));
            }
        }
        Ok(Self {
            kind: EntityKind::Zone,
            body: Value::Object(body),
        })
    }

    /// Builds a campaign create payload.
    ///
    /// The advertiser reference must already be resolved to a remote id.
    /// `display_type` is omitted when it equals the platform default;
    /// dates are serialized date-only (`%Y-%m-%d`).
    pub fn campaign(
        entity: &LocalEntity,
        advertiser_id: u64,
        default_display_type: &str,
    ) -> EngineResult<Self> {
        let campaign = entity
            .campaign()
            .ok_or_else(|| EngineError::validation("entity is not a campaign"))?;
        let mut body = named_body(entity)?;
        body.insert("advertiser_id".into(), json!(advertiser_id));

        if let Some(start) = campaign.start_date {
            body.insert("start_date".into(), json!(start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = campaign.end_date {
            body.insert("end_date".into(), json!(end.format("%Y-%m-%d").to_string()));
        }
        if let Some(display_type) = &campaign.display_type {
            if display_type != default_display_type {
                body.insert("display_type".into(), json!(display_type));
            }
        }
        if let Some(weight) = campaign.weight {
            body.insert("weight".into(), json!(weight));
        }

        Ok(Self {
            kind: EntityKind::Campaign,
            body: Value::Object(body),
        })
    }

    /// Builds a placement create payload. All three ids are remote.
    pub fn placement(
        campaign_id: u64,
        advertisement_id: u64,
        zone_id: u64,
        restrictions: &[String],
    ) -> Self {
        let mut body = Map::new();
        body.insert("campaign_id".into(), json!(campaign_id));
        body.insert("advertisement_id".into(), json!(advertisement_id));
        body.insert("zone_id".into(), json!(zone_id));
        if !restrictions.is_empty() {
            body.insert("restrictions".into(), json!(restrictions));
        }
        Self {
            kind: EntityKind::Placement,
            body: Value::Object(body),
        }
    }
}

/// Builds the common `{name, network_id}` body, validating the name.
fn named_body(entity: &LocalEntity) -> EngineResult<Map<String, Value>> {
    if entity.name.trim().is_empty() {
        return Err(EngineError::validation(format!(
            "{} name must not be empty",
            entity.kind()
        )));
    }
    let mut body = Map::new();
    body.insert("name".into(), json!(entity.name));
    body.insert("network_id".into(), json!(entity.network_id));
    Ok(body)
}

/// The remote advertising platform API.
///
/// Implementations handle transport only; throttling, retry, and
/// classification live in the engine.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Lists entities of a kind within a scope.
    async fn list_by_scope(
        &self,
        kind: EntityKind,
        scope: RemoteScope,
    ) -> EngineResult<Vec<RemoteEntity>>;

    /// Fetches one entity by remote id.
    async fn get(&self, kind: EntityKind, id: u64) -> EngineResult<RemoteEntity>;

    /// Creates a new remote entity.
    async fn create(&self, payload: CreatePayload) -> EngineResult<RemoteEntity>;

    /// Checks whether an entity with the given name exists in a scope.
    async fn exists_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        scope: RemoteScope,
    ) -> EngineResult<bool>;
}

/// A scripted failure for the mock API.
#[derive(Debug, Clone)]
struct ScriptedFailure {
    status: u16,
    message: String,
    remaining: u32,
}

/// A mock remote API for testing.
///
/// Entities created through the mock become visible to subsequent
/// `exists_by_name` / `list_by_scope` / `get` calls. Failures can be
/// scripted per entity name and expire after a set number of calls,
/// which makes retry paths testable.
#[derive(Debug, Default)]
pub struct MockRemoteApi {
    entities: RwLock<Vec<(RemoteScope, RemoteEntity)>>,
    next_id: AtomicU64,
    create_failures: Mutex<HashMap<String, ScriptedFailure>>,
    exists_calls: AtomicU32,
    create_calls: AtomicU32,
    list_calls: AtomicU32,
    get_calls: AtomicU32,
}

impl MockRemoteApi {
    /// Creates an empty mock with ids starting at 1000.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Seeds a pre-existing remote entity in a scope, returning its id.
    pub fn seed(&self, scope: RemoteScope, name: &str, kind: EntityKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entities
            .write()
            .push((scope, RemoteEntity::new(id, name, kind)));
        id
    }

    /// Scripts `times` consecutive create failures for the given entity
    /// name; later creates succeed.
    pub fn fail_create(&self, name: &str, status: u16, message: &str, times: u32) {
        self.create_failures.lock().insert(
            name.to_string(),
            ScriptedFailure {
                status,
                message: message.to_string(),
                remaining: times,
            },
        );
    }

    /// Number of `exists_by_name` calls made.
    pub fn exists_calls(&self) -> u32 {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Number of `create` calls made.
    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `list_by_scope` calls made.
    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    pub fn total_calls(&self) -> u32 {
        self.exists_calls.load(Ordering::SeqCst)
            + self.create_calls.load(Ordering::SeqCst)
            + self.list_calls.load(Ordering::SeqCst)
            + self.get_calls.load(Ordering::SeqCst)
    }

    /// Names of all entities of a kind currently known to the mock.
    pub fn names(&self, kind: EntityKind) -> HashSet<String> {
        self.entities
            .read()
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(_, e)| e.name.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn list_by_scope(
        &self,
        kind: EntityKind,
        scope: RemoteScope,
    ) -> EngineResult<Vec<RemoteEntity>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entities
            .read()
            .iter()
            .filter(|(s, e)| *s == scope && e.kind == kind)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn get(&self, kind: EntityKind, id: u64) -> EngineResult<RemoteEntity> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.entities
            .read()
            .iter()
            .find(|(_, e)| e.kind == kind && e.id == id)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| EngineError::remote(404, format!("{kind} {id} not found")))
    }

    async fn create(&self, payload: CreatePayload) -> EngineResult<RemoteEntity> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let name = payload.name().unwrap_or("").to_string();
        {
            let mut failures = self.create_failures.lock();
            if let Some(failure) = failures.get_mut(&name) {
                if failure.remaining > 0 {
                    failure.remaining -= 1;
                    return Err(EngineError::remote(failure.status, failure.message.clone()));
                }
                failures.remove(&name);
            }
        }

        let scope = match payload.kind {
            EntityKind::Campaign => RemoteScope::Advertiser(
                payload
                    .body
                    .get("advertiser_id")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            ),
            _ => RemoteScope::Network(
                payload
                    .body
                    .get("network_id")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            ),
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entity =
            RemoteEntity::new(id, name, payload.kind).with_attributes(payload.body.clone());
        self.entities.write().push((scope, entity.clone()));
        Ok(entity)
    }

    async fn exists_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        scope: RemoteScope,
    ) -> EngineResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entities
            .read()
            .iter()
            .any(|(s, e)| *s == scope && e.kind == kind && e.name == name))
    }
}
