//! Workflow records. Graphs are stored and returned, never run.

use tracing::info;

use toolforge_store::NewWorkflow;

use crate::error::{RegistryError, Result};
use crate::registry::PrimitiveRegistry;
use crate::types::Workflow;

impl PrimitiveRegistry {
    pub async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::Validation("workflow name must not be empty".into()));
        }
        for (field, value) in [("nodes", &new.nodes), ("edges", &new.edges)] {
            if !(value.is_null() || value.is_array()) {
                return Err(RegistryError::Validation(format!("workflow {field} must be an array")));
            }
        }
        let workflow = self.inner.workflows.create(new).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.inner.workflows.get(id).await?)
    }

    pub async fn list_workflows(&self, enabled_only: bool) -> Result<Vec<Workflow>> {
        Ok(self.inner.workflows.list(enabled_only).await?)
    }

    pub async fn set_workflow_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        Ok(self.inner.workflows.set_enabled(id, enabled).await?)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<()> {
        self.inner.workflows.delete(id).await?;
        info!(workflow_id = %id, "workflow deleted");
        Ok(())
    }
}
