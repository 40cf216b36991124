use super::RuntimeSource;
use crate::crds::kagent::ModelConfig;
use crate::crds::{CatalogKind, CatalogPayload, Condition};
use crate::tasks::catalog;

impl RuntimeSource for ModelConfig {
    const CATALOG_KIND: CatalogKind = CatalogKind::Model;
    const CONTROLLER: &'static str = "modelconfig-discovery";

    fn catalog_payload(&self, spec_name: String) -> CatalogPayload {
        CatalogPayload::Model(catalog::model_payload(self, spec_name))
    }

    fn runtime_conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }
}
