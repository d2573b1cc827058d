use std::collections::HashMap;
use std::sync::RwLock;

use coursepay_core::TenantId;

use crate::plan::{PlanTemplate, PlanTemplateId};
use crate::product::{Product, ProductId};

/// Read-only catalog lookup used by the billing services.
///
/// The engine never mutates the catalog; template/product authoring is the
/// back office's concern and flows through whatever store implements this.
pub trait PlanCatalog: Send + Sync {
    fn template(&self, tenant_id: TenantId, id: PlanTemplateId) -> Option<PlanTemplate>;
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<Product>;
    fn list_templates(&self, tenant_id: TenantId) -> Vec<PlanTemplate>;
}

/// In-memory catalog for dev/test wiring.
#[derive(Debug, Default)]
pub struct InMemoryPlanCatalog {
    templates: RwLock<HashMap<(TenantId, PlanTemplateId), PlanTemplate>>,
    products: RwLock<HashMap<(TenantId, ProductId), Product>>,
}

impl InMemoryPlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_template(&self, tenant_id: TenantId, template: PlanTemplate) {
        if let Ok(mut map) = self.templates.write() {
            map.insert((tenant_id, template.id), template);
        }
    }

    pub fn upsert_product(&self, tenant_id: TenantId, product: Product) {
        if let Ok(mut map) = self.products.write() {
            map.insert((tenant_id, product.id), product);
        }
    }
}

impl PlanCatalog for InMemoryPlanCatalog {
    fn template(&self, tenant_id: TenantId, id: PlanTemplateId) -> Option<PlanTemplate> {
        let map = self.templates.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<Product> {
        let map = self.products.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn list_templates(&self, tenant_id: TenantId) -> Vec<PlanTemplate> {
        let map = match self.templates.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        let mut templates: Vec<_> = map
            .iter()
            .filter_map(|((t, _id), v)| if *t == tenant_id { Some(v.clone()) } else { None })
            .collect();
        templates.sort_by_key(|t| *t.id.as_uuid());
        templates
    }
}
