use std::{collections::HashMap, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::MiddlewareError;
use crate::handler::SharedHandler;

/// Wraps `next` in a new middleware configured from the binding's options.
pub(crate) type Constructor =
    Arc<dyn Fn(SharedHandler, &Value) -> Result<SharedHandler, MiddlewareError> + Send + Sync>;

/// Middleware constructors by type name. Populated at startup, then shared read-only.
#[derive(Default, Clone)]
pub(crate) struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl Registry {
    pub(crate) fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(SharedHandler, &Value) -> Result<SharedHandler, MiddlewareError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        debug!(%name, "Registering middleware");
        self.constructors.insert(name, Arc::new(constructor));
    }

    pub(crate) fn create(
        &self,
        name: &str,
        next: SharedHandler,
        opts: &Value,
    ) -> Result<SharedHandler, MiddlewareError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| MiddlewareError::UnknownMiddlewareType(name.to_string()))?;

        constructor(next, opts)
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Decodes constructor options; a missing options value yields the defaults.
pub(crate) fn decode_options<T>(name: &str, opts: &Value) -> Result<T, MiddlewareError>
where
    T: DeserializeOwned + Default,
{
    if opts.is_null() {
        return Ok(T::default());
    }

    serde_json::from_value(opts.clone()).map_err(|err| MiddlewareError::InvalidOptions {
        name: name.to_string(),
        reason: err.to_string(),
    })
}
