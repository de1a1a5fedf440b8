use serde::{Deserialize, Serialize};

use crate::task::EmployeeInfo;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    #[serde(default)]
    pub add: bool,
    #[serde(default)]
    pub view: bool,
    #[serde(default)]
    pub change: bool,
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permissions {
    #[serde(default)]
    pub catalog: Permission,
    #[serde(default)]
    pub techsupport: Permission,
    #[serde(default)]
    pub hall_booking: Permission,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    #[serde(default)]
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub permission: Permissions,
    #[serde(default)]
    pub groups: Vec<serde_json::Value>,
}

/// The authenticated principal as cached between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub account: Account,
    #[serde(default)]
    pub employee: Option<EmployeeInfo>,
}

impl Identity {
    pub fn username(&self) -> &str {
        &self.account.username
    }

    pub fn display_name(&self) -> &str {
        self.employee
            .as_ref()
            .map(|e| e.full_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.account.username)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access: String,
    pub refresh: String,
    pub account: Account,
    #[serde(default)]
    pub employee: Option<EmployeeInfo>,
}

impl AuthResponse {
    pub fn identity(&self) -> Identity {
        Identity {
            account: self.account.clone(),
            employee: self.employee.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}
