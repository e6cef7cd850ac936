//! Shared-runtime build cache.
//!
//! Codegen itself is private per request; only the runtime support library
//! is shared across requests, keyed by execution host and source content.
//! Each key carries its own lock so concurrent requests against the same
//! host serialize on "build or reuse" without blocking unrelated hosts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use rayon::prelude::*;

use crate::ir::error::BackendError;

/// One translation unit handed to the native toolchain.
#[derive(Clone, Debug)]
pub struct CompileUnit {
    pub name: String,
    pub source: String,
}

/// A built shared runtime: the content key plus the produced object paths.
#[derive(Clone, Debug)]
pub struct BuiltRuntime {
    pub key: String,
    pub objects: Vec<String>,
}

#[derive(Default)]
struct Slot {
    built: Mutex<Option<Arc<BuiltRuntime>>>,
}

/// Process-wide get-or-build cache for the shared runtime.
#[derive(Default)]
pub struct RuntimeCache {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

/// Content key: host identity plus an md5 over every unit's name and source.
pub fn content_key(host: &str, units: &[CompileUnit]) -> String {
    let mut buf = Vec::new();
    buf.extend_from_slice(host.as_bytes());
    for u in units {
        buf.push(0);
        buf.extend_from_slice(u.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(u.source.as_bytes());
    }
    format!("{:x}", md5::compute(&buf))
}

impl RuntimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the runtime for `host`/`units`, building it at most once per
    /// key. Concurrent callers with the same key serialize on the key's own
    /// lock; callers with different keys do not contend.
    pub fn get_or_build<F>(
        &self,
        host: &str,
        units: &[CompileUnit],
        build: F,
    ) -> Result<Arc<BuiltRuntime>, BackendError>
    where
        F: FnOnce(&str, &[CompileUnit]) -> Result<BuiltRuntime, BackendError>,
    {
        let key = content_key(host, units);
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| BackendError::Internal("runtime cache poisoned".into()))?;
            slots.entry(key.clone()).or_default().clone()
        };
        let mut built = slot
            .built
            .lock()
            .map_err(|_| BackendError::Internal("runtime cache poisoned".into()))?;
        if let Some(rt) = built.as_ref() {
            debug!("runtime cache hit for {}", key);
            return Ok(rt.clone());
        }
        debug!("runtime cache miss for {}, building", key);
        let rt = Arc::new(build(&key, units)?);
        *built = Some(rt.clone());
        Ok(rt)
    }
}

/// Compile independent units in parallel. Failures are collected and
/// re-raised together after every sibling unit has finished.
pub fn compile_objects<F>(units: &[CompileUnit], compile: F) -> Result<Vec<String>, BackendError>
where
    F: Fn(&CompileUnit) -> Result<String, BackendError> + Sync,
{
    let results: Vec<(usize, Result<String, BackendError>)> = units
        .par_iter()
        .enumerate()
        .map(|(i, u)| (i, compile(u)))
        .collect();

    let mut objects = vec![String::new(); units.len()];
    let mut failures = Vec::new();
    for (i, r) in results {
        match r {
            Ok(obj) => objects[i] = obj,
            Err(e) => failures.push(format!("{}: {}", units[i].name, e)),
        }
    }
    if failures.is_empty() {
        Ok(objects)
    } else {
        Err(BackendError::Internal(format!(
            "runtime build failed: {}",
            failures.join("; ")
        )))
    }
}
