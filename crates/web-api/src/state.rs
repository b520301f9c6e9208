use std::sync::Arc;

use application::{Gateway, PresenceRegistry};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub presence: Arc<PresenceRegistry>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(gateway: Gateway, jwt_service: Arc<JwtService>) -> Self {
        Self {
            presence: gateway.presence().clone(),
            gateway,
            jwt_service,
        }
    }
}
