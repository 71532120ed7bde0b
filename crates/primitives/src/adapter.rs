//! Primitive Adapter.
//!
//! `PrimitiveAdapter` is the single entry point for running a primitive:
//! 1. Resolves the definition by id or name (cache first, then the store).
//! 2. Rejects disabled primitives and input that fails the declared schema.
//! 3. Resolves the compiled handler for `name@version`.
//! 4. Runs the handler racing the primitive's timeout and the caller's
//!    cancellation token.
//! 5. Writes a `primitive_executions` audit row for every invocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{NewPrimitiveExecution, PrimitiveRow};
use db::PrimitiveStore;

use crate::{
    schema::{validate_primitive_input, InputSchema},
    EnvView, HandlerContext, HandlerRegistry, PrimitiveError, PrimitiveInfo,
};

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// A primitive definition loaded from the store.
#[derive(Debug, Clone)]
pub struct Primitive {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub input_schema: InputSchema,
    pub timeout: Duration,
    pub enabled: bool,
    pub version: String,
}

impl Primitive {
    /// Convert a stored row. Non-positive timeouts fall back to `default_timeout`.
    pub fn from_row(row: PrimitiveRow, default_timeout: Duration) -> Result<Self, PrimitiveError> {
        let input_schema =
            InputSchema::from_json(&row.input_schema).map_err(|e| PrimitiveError::InvalidSchema {
                primitive: row.name.clone(),
                message: e.to_string(),
            })?;

        let timeout = u64::try_from(row.timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        Ok(Self {
            id: row.id,
            name: row.name,
            category: row.category,
            input_schema,
            timeout,
            enabled: row.enabled,
            version: row.version,
        })
    }

    pub fn info(&self) -> PrimitiveInfo {
        PrimitiveInfo {
            id: self.id,
            name: self.name.clone(),
            category: self.category.clone(),
            version: self.version.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

/// How a caller names the primitive to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveRef {
    Id(Uuid),
    Name(String),
}

impl fmt::Display for PrimitiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Where an invocation comes from; recorded on the audit row.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<Uuid>,
    pub node_id: Option<String>,
    /// Cancels the in-flight handler when triggered.
    pub cancel: Option<CancellationToken>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Used when a primitive row carries no positive timeout.
    pub default_timeout: Duration,
    /// Environment variables handlers may read.
    pub env_allow_list: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            env_allow_list: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// PrimitiveAdapter
// ---------------------------------------------------------------------------

pub struct PrimitiveAdapter {
    store: Arc<dyn PrimitiveStore>,
    handlers: HandlerRegistry,
    cache: RwLock<HashMap<Uuid, Arc<Primitive>>>,
    http: reqwest::Client,
    env: EnvView,
    default_timeout: Duration,
}

impl PrimitiveAdapter {
    pub fn new(store: Arc<dyn PrimitiveStore>, handlers: HandlerRegistry, config: AdapterConfig) -> Self {
        Self {
            store,
            handlers,
            cache: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            env: EnvView::from_process(&config.env_allow_list),
            default_timeout: config.default_timeout,
        }
    }

    /// Replace the environment view handed to handlers.
    pub fn with_env(mut self, env: EnvView) -> Self {
        self.env = env;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    // -----------------------------------------------------------------------
    // Registry lookups
    // -----------------------------------------------------------------------

    pub async fn get_primitive(&self, id: Uuid) -> Result<Arc<Primitive>, PrimitiveError> {
        let cached = self.cache.read().get(&id).cloned();
        if let Some(primitive) = cached {
            return Ok(primitive);
        }

        let row = self
            .store
            .find_primitive(id)
            .await?
            .ok_or_else(|| PrimitiveError::NotFound(id.to_string()))?;
        self.remember(row)
    }

    /// Look up by unique name: scan the cache, then fall back to the store.
    pub async fn get_primitive_by_name(&self, name: &str) -> Result<Arc<Primitive>, PrimitiveError> {
        let cached = self.cache.read().values().find(|p| p.name == name).cloned();
        if let Some(primitive) = cached {
            return Ok(primitive);
        }

        let row = self
            .store
            .find_primitive_by_name(name)
            .await?
            .ok_or_else(|| PrimitiveError::NotFound(name.to_string()))?;
        self.remember(row)
    }

    pub async fn resolve(&self, reference: &PrimitiveRef) -> Result<Arc<Primitive>, PrimitiveError> {
        match reference {
            PrimitiveRef::Id(id) => self.get_primitive(*id).await,
            PrimitiveRef::Name(name) => self.get_primitive_by_name(name).await,
        }
    }

    fn remember(&self, row: PrimitiveRow) -> Result<Arc<Primitive>, PrimitiveError> {
        let primitive = Arc::new(Primitive::from_row(row, self.default_timeout)?);
        self.cache.write().insert(primitive.id, Arc::clone(&primitive));
        debug!("cached primitive '{}' ({})", primitive.name, primitive.id);
        Ok(primitive)
    }

    /// Drop one cached definition so the next lookup reads the store.
    pub fn invalidate(&self, id: Uuid) {
        self.cache.write().remove(&id);
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Validate and run a primitive.
    ///
    /// # Errors
    /// `NotFound`, `Disabled`, `Validation` and `HandlerNotRegistered` are
    /// returned before the handler runs and leave no audit row.  `Handler`,
    /// `Timeout` and `Cancelled` are returned after the audit row is written.
    #[instrument(skip(self, input, call), fields(primitive = %reference, node_id = ?call.node_id))]
    pub async fn execute_primitive(
        &self,
        reference: &PrimitiveRef,
        input: Value,
        call: &CallContext,
    ) -> Result<Value, PrimitiveError> {
        let primitive = self.resolve(reference).await?;

        if !primitive.enabled {
            return Err(PrimitiveError::Disabled(primitive.name.clone()));
        }

        if let Err(errors) = validate_primitive_input(&primitive.input_schema, &input) {
            warn!("primitive '{}' rejected input: {}", primitive.name, errors);
            return Err(PrimitiveError::Validation {
                primitive: primitive.name.clone(),
                errors,
            });
        }

        let handler = self
            .handlers
            .get(&primitive.name, &primitive.version)
            .ok_or_else(|| PrimitiveError::HandlerNotRegistered {
                name: primitive.name.clone(),
                version: primitive.version.clone(),
            })?;

        let ctx = HandlerContext::new(primitive.info(), self.http.clone(), self.env.clone());
        let started_at = Utc::now();
        let clock = Instant::now();

        let invocation = tokio::time::timeout(primitive.timeout, handler.call(input.clone(), &ctx));
        let timed = async {
            match invocation.await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(source)) => Err(PrimitiveError::Handler {
                    primitive: primitive.name.clone(),
                    source,
                }),
                Err(_) => Err(PrimitiveError::Timeout {
                    primitive: primitive.name.clone(),
                    timeout_ms: primitive.timeout.as_millis() as u64,
                }),
            }
        };

        let outcome = match &call.cancel {
            Some(token) => tokio::select! {
                result = timed => result,
                _ = token.cancelled() => Err(PrimitiveError::Cancelled {
                    primitive: primitive.name.clone(),
                }),
            },
            None => timed.await,
        };

        let duration = clock.elapsed();
        match &outcome {
            Ok(_) => info!("primitive '{}' succeeded in {:?}", primitive.name, duration),
            Err(e) => error!("primitive '{}' failed in {:?}: {}", primitive.name, duration, e),
        }

        let record = NewPrimitiveExecution {
            primitive_id: primitive.id,
            execution_id: call.execution_id,
            workflow_id: call.workflow_id,
            node_id: call.node_id.clone(),
            input,
            output: outcome.as_ref().ok().cloned(),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
            started_at,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as i64,
        };
        if let Err(e) = self.store.insert_primitive_execution(record).await {
            error!("failed to write audit row for primitive '{}': {}", primitive.name, e);
        }

        outcome
    }
}
