//! Web API 层。
//!
//! 提供 Axum 路由：健康检查、在线状态查询，以及承载连接协议的 WebSocket 入口。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{bearer_token, Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
