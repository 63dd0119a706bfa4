//! Typed, cached access to production metadata.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use shotline_core::{
    CacheSettings, Context, DaemonSettings, NamingRules, ProjectId, StatusRecord, StatusUpdate,
    StepId, TechnicalSpec,
};

use crate::cache::MetadataCache;
use crate::client::DaemonClient;
use crate::error::DaemonError;

pub fn spec_key(ctx: &Context) -> String {
    format!("spec:{}", ctx.shot_key())
}

pub fn naming_key(project: &ProjectId, step: &StepId) -> String {
    format!("naming:{project}/{step}")
}

pub fn status_key(ctx: &Context) -> String {
    format!("status:{}", ctx.step_key())
}

pub const STATES_KEY: &str = "states";
pub const USER_KEY: &str = "user";

#[derive(Clone)]
pub struct Production {
    client: Arc<DaemonClient>,
    cache: Arc<MetadataCache>,
}

impl Production {
    pub fn new(client: Arc<DaemonClient>, cache: Arc<MetadataCache>) -> Self {
        Self { client, cache }
    }

    /// Lazily connecting client plus a fresh cache.
    pub fn from_settings(daemon: &DaemonSettings, cache: &CacheSettings) -> Self {
        Self::new(
            Arc::new(DaemonClient::new(daemon)),
            Arc::new(MetadataCache::from_settings(cache)),
        )
    }

    pub fn client(&self) -> &Arc<DaemonClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn ping(&self) -> Result<(), DaemonError> {
        self.client.request("ping", Vec::new()).map(|_| ())
    }

    pub fn technical_spec(&self, ctx: &Context) -> Result<TechnicalSpec, DaemonError> {
        let value = self.cache.fetch(&spec_key(ctx), || {
            self.client
                .request(
                    "get_spec",
                    vec![json!(ctx.project.as_str()), json!(ctx.shot.as_str())],
                )
                .and_then(checked::<TechnicalSpec>)
        })?;
        decode(value)
    }

    pub fn naming_rules(
        &self,
        project: &ProjectId,
        step: &StepId,
    ) -> Result<NamingRules, DaemonError> {
        let value = self.cache.fetch(&naming_key(project, step), || {
            self.client
                .request(
                    "get_naming_rules",
                    vec![json!(project.as_str()), json!(step.as_str())],
                )
                .and_then(checked::<NamingRules>)
        })?;
        decode(value)
    }

    /// Step status, coalesced so UI polling cannot flood the daemon.
    pub fn status(&self, ctx: &Context) -> Result<StatusRecord, DaemonError> {
        let value = self.cache.get_coalesced(&status_key(ctx), || {
            self.client
                .request(
                    "get_status",
                    vec![
                        json!(ctx.project.as_str()),
                        json!(ctx.shot.as_str()),
                        json!(ctx.step.as_str()),
                    ],
                )
                .and_then(checked::<StatusRecord>)
        })?;
        decode(value)
    }

    /// Short state codes the daemon accepts (e.g. `WIP`, `REV`, `OK`).
    pub fn states(&self) -> Result<Vec<String>, DaemonError> {
        let value = self.cache.fetch(STATES_KEY, || {
            self.client
                .request("list_states", Vec::new())
                .and_then(|value| checked_field::<Vec<String>>(value, "states"))
        })?;
        field(value, "states")
    }

    pub fn current_user(&self) -> Result<String, DaemonError> {
        let value = self.cache.fetch(USER_KEY, || {
            self.client
                .request("get_user", Vec::new())
                .and_then(|value| checked_field::<String>(value, "user"))
        })?;
        field(value, "user")
    }

    /// Write a status change, then drop every cached status of that step.
    pub fn update_status(&self, ctx: &Context, update: &StatusUpdate) -> Result<(), DaemonError> {
        let result = self.client.request(
            "set_status",
            vec![
                json!(ctx.project.as_str()),
                json!(ctx.shot.as_str()),
                json!(ctx.step.as_str()),
                json!(update.state),
                json!(update.comment),
                json!(update.version),
                json!(update.completion),
                json!(update.published),
            ],
        );
        // The daemon may have applied the write even when the reply was lost.
        self.cache.invalidate_prefix(&status_key(ctx));
        result?;
        tracing::info!(
            context = %ctx,
            state = %update.state,
            version = update.version,
            "status updated"
        );
        Ok(())
    }

    /// Forget the cached technical spec of the shot `ctx` points at.
    pub fn invalidate_spec(&self, ctx: &Context) {
        self.cache.invalidate(&spec_key(ctx));
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, DaemonError> {
    Ok(serde_json::from_value(value)?)
}

/// Producer-side decode check: a payload that is not a `T` fails the fetch
/// instead of being cached.
fn checked<T: DeserializeOwned>(value: Value) -> Result<Value, DaemonError> {
    T::deserialize(&value)?;
    Ok(value)
}

fn checked_field<T: DeserializeOwned>(value: Value, name: &str) -> Result<Value, DaemonError> {
    let inner = value
        .get(name)
        .ok_or_else(|| DaemonError::Protocol(format!("response payload lacks '{name}'")))?;
    T::deserialize(inner)?;
    Ok(value)
}

fn field<T: DeserializeOwned>(mut value: Value, name: &str) -> Result<T, DaemonError> {
    let inner = value
        .get_mut(name)
        .map(Value::take)
        .ok_or_else(|| DaemonError::Protocol(format!("response payload lacks '{name}'")))?;
    decode(inner)
}
