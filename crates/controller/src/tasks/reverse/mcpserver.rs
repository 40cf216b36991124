use super::RuntimeSource;
use crate::crds::kagent::MCPServer;
use crate::crds::{CatalogKind, CatalogPayload, Condition};
use crate::tasks::catalog;

impl RuntimeSource for MCPServer {
    const CATALOG_KIND: CatalogKind = CatalogKind::ToolServer;
    const CONTROLLER: &'static str = "mcpserver-discovery";

    fn catalog_payload(&self, spec_name: String) -> CatalogPayload {
        CatalogPayload::ToolServer(catalog::tool_server_payload(self, spec_name))
    }

    fn runtime_conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }
}
