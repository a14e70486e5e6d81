use serde::{Deserialize, Serialize};

/// An administrator that the external auth collaborator has already
/// authenticated. Status and audit operations take one of these so they can
/// only be reached from an administrative context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminContext {
    admin_id: String,
}

impl AdminContext {
    pub fn new(admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
        }
    }

    pub fn admin_id(&self) -> &str {
        &self.admin_id
    }
}
