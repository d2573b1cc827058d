//! Per-stream cursor tracking for idempotent projections.
//!
//! The bus delivers at-least-once; cursors turn redelivery into no-ops and
//! detect sequence gaps (a gap means the projection missed an event and
//! must be rebuilt rather than silently skipping state).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use coursepay_core::{AggregateId, TenantId};

/// Durable cursor storage (optional; in-memory cursors suffice for
/// rebuild-on-start read models).
pub trait ProjectionCursorStore: Send + Sync {
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64>;

    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    );

    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str);
}

/// No-persistence cursor store.
pub struct InMemoryCursorStore;

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        _tenant_id: TenantId,
        _aggregate_id: AggregateId,
        _projection_name: &str,
    ) -> Option<u64> {
        None
    }

    fn update_cursor(
        &self,
        _tenant_id: TenantId,
        _aggregate_id: AggregateId,
        _projection_name: &str,
        _sequence_number: u64,
    ) {
        // no-op
    }

    fn clear_cursors(&self, _tenant_id: TenantId, _projection_name: &str) {
        // no-op
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// What an incoming sequence number means for this projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorAdvance {
    /// Already processed (redelivery); skip without error.
    Stale,
    /// Next expected event; apply it.
    Apply,
    /// A sequence gap; the projection is behind and must be rebuilt.
    Gap { last: u64, found: u64 },
}

/// In-memory cursor map with optional durable backing, shared by all
/// projections.
pub struct CursorTracker<C = InMemoryCursorStore> {
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl CursorTracker<InMemoryCursorStore> {
    pub fn new(projection_name: impl Into<String>) -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: projection_name.into(),
        }
    }
}

impl<C: ProjectionCursorStore> CursorTracker<C> {
    pub fn with_store(projection_name: impl Into<String>, store: Arc<C>) -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(store),
            projection_name: projection_name.into(),
        }
    }

    fn current(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        if let Some(store) = &self.cursor_store {
            return store
                .get_cursor(tenant_id, aggregate_id, &self.projection_name)
                .unwrap_or(0);
        }
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey {
                    tenant_id,
                    aggregate_id,
                })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    /// Classify an incoming sequence number against the stored cursor.
    pub fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> CursorAdvance {
        let last = self.current(tenant_id, aggregate_id);

        if sequence_number == 0 || (last != 0 && sequence_number > last + 1) {
            return CursorAdvance::Gap {
                last,
                found: sequence_number,
            };
        }
        if sequence_number <= last {
            return CursorAdvance::Stale;
        }
        CursorAdvance::Apply
    }

    /// Record a successfully applied sequence number.
    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                sequence_number,
            );
        }

        if let Some(store) = &self.cursor_store {
            store.update_cursor(
                tenant_id,
                aggregate_id,
                &self.projection_name,
                sequence_number,
            );
        }
    }

    /// Drop all cursors for a tenant (rebuild support).
    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }

        if let Some(store) = &self.cursor_store {
            store.clear_cursors(tenant_id, &self.projection_name);
        }
    }
}
