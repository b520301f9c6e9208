use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 认证协作方给出的身份，在连接生命周期内不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    pub role: String,
}

impl Identity {
    pub fn new(user_id: UserId, display_name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            role: role.into(),
        }
    }
}
