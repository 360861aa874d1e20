//! Procedure signature resolution against the live catalog.

mod signature;

use std::sync::Arc;

use dashmap::DashMap;

pub use signature::ProcedureSignature;

use crate::db::{DbResult, Session};

/// Resolve `name` and read its argument catalog, bypassing any cache.
pub fn resolve_signature(session: &mut dyn Session, name: &str) -> DbResult<ProcedureSignature> {
    let resolved = session.resolve_name(name)?;
    let rows = session.argument_rows(&resolved)?;
    tracing::debug!(
        procedure = %name,
        owner = %resolved.owner,
        package = resolved.package.as_deref().unwrap_or(""),
        rows = rows.len(),
        "Resolved procedure signature"
    );
    Ok(ProcedureSignature::from_rows(name, &rows))
}

/// Process-wide signature cache. Insert-once per name, never invalidated.
pub struct SignatureCache {
    enabled: bool,
    entries: DashMap<String, Arc<ProcedureSignature>>,
}

impl SignatureCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: DashMap::new(),
        }
    }

    pub fn resolve(
        &self,
        session: &mut dyn Session,
        name: &str,
    ) -> DbResult<Arc<ProcedureSignature>> {
        if !self.enabled {
            return resolve_signature(session, name).map(Arc::new);
        }

        let key = name.to_lowercase();
        if let Some(hit) = self.entries.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        // Resolve without holding a shard lock. Racing resolvers of the same
        // name both query; the first insert wins.
        let fresh = Arc::new(resolve_signature(session, name)?);
        let entry = self.entries.entry(key).or_insert(fresh);
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
