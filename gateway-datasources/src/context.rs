//! Provide a [`RequestContext`] for the hooks of one client request.
//!
//! The context is created by the caller and handed to every data source
//! dispatch issued for that client request. Hooks use it to read
//! caller-supplied entries such as authorization tokens and to pass data to
//! each other. The data sources never write to it.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use crate::json_ext::Value;

/// Holds [`RequestContext`] entries.
pub(crate) type Entries = Arc<DashMap<String, Value>>;

/// Context threaded through all the hooks of one client request.
///
/// Cloning is cheap and clones share their entries, extensions and
/// cancellation token.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    entries: Entries,
    extensions: Arc<parking_lot::Mutex<http::Extensions>>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled whenever `token` is.
    pub fn with_cancellation_token(token: CancellationToken) -> Self {
        RequestContext {
            cancellation: token,
            ..Default::default()
        }
    }

    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de>,
    {
        self.entries
            .get(&key.into())
            .map(|v| serde_json_bytes::from_value(v.value().clone()))
            .transpose()
            .map_err(|e| e.into())
    }

    /// Inserts an entry, returning the previous value for `key` if there was one.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de> + Serialize,
    {
        match serde_json_bytes::to_value(value) {
            Ok(value) => self
                .entries
                .insert(key.into(), value)
                .map(|v| serde_json_bytes::from_value(v))
                .transpose()
                .map_err(|e| e.into()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert<K, V>(
        &self,
        key: K,
        upsert: impl Fn(V) -> V,
        default: impl Fn() -> V,
    ) -> Result<(), BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de> + Serialize,
    {
        let key = key.into();
        self.entries
            .entry(key.clone())
            .or_try_insert_with(|| serde_json_bytes::to_value((default)()))?;
        let mut result = Ok(());
        self.entries
            .alter(&key, |_, v| match serde_json_bytes::from_value(v.clone()) {
                Ok(value) => match serde_json_bytes::to_value((upsert)(value)) {
                    Ok(value) => value,
                    Err(e) => {
                        result = Err(e);
                        v
                    }
                },
                Err(e) => {
                    result = Err(e);
                    v
                }
            });
        result.map_err(|e| e.into())
    }

    pub fn contains_key<K>(&self, key: K) -> bool
    where
        K: Into<String>,
    {
        self.entries.contains_key(&key.into())
    }

    /// Non serializable data shared by the hooks.
    ///
    /// The lock is held for the duration of the closure.
    pub fn with_extensions<T>(&self, func: impl FnOnce(&mut http::Extensions) -> T) -> T {
        let mut guard = self.extensions.lock();
        func(&mut guard)
    }

    /// The token cancelling every dispatch made with this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels the in-flight dispatches made with this context and all the later ones.
    pub fn cancel(&self) {
        self.cancellation.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
