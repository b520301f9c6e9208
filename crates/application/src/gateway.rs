//! 连接网关
//!
//! 每条连接的状态机：`Connecting → Authenticated → Active → Closed`。
//! 认证失败直接关闭，不会进入在线状态表或房间。
//! 进入 `Closed` 时按顺序执行：清除输入状态 → 退出全部房间 →
//! 注销出站队列 → 在线状态注销（跨越在线/离线边界时广播）。

use std::sync::Arc;
use std::time::Duration;

use domain::{ChatStore, ClientEvent, ConnectionId, Identity, ServerEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Authenticator,
    clock::Clock,
    error::ApplicationError,
    hub::ConnectionHub,
    pipeline::{MessagePipeline, MessagePipelineDependencies, SendMessageRequest},
    presence::PresenceRegistry,
    publisher::DomainEventPublisher,
    rooms::RoomRouter,
    typing::TypingStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

impl ConnectionState {
    /// 只允许 `Connecting → Authenticated → Active` 依次前进；
    /// 除 `Closed` 自身外任何状态都可以进入 `Closed`。
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Authenticated, Active)
                | (Connecting | Authenticated | Active, Closed)
        )
    }

    /// 按状态机前进，非法迁移保持原状态并返回 false
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        *self = next;
        true
    }
}

/// 处理完一帧后连接应当继续还是关闭
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Close,
}

pub struct GatewayDependencies {
    pub authenticator: Arc<dyn Authenticator>,
    pub hub: Arc<ConnectionHub>,
    pub presence: Arc<PresenceRegistry>,
    pub router: Arc<RoomRouter>,
    pub typing: Arc<TypingStore>,
    pub pipeline: Arc<MessagePipeline>,
    pub clock: Arc<dyn Clock>,
}

/// 组装实时服务所需的参数
#[derive(Debug, Clone, Copy)]
pub struct RealtimeOptions {
    pub typing_ttl: Duration,
    pub outbound_queue_capacity: usize,
    pub store_timeout: Duration,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(10),
            outbound_queue_capacity: 64,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// 组装好的实时服务，供二进制入口和测试共用
pub struct RealtimeServices {
    pub gateway: Gateway,
    pub hub: Arc<ConnectionHub>,
    pub presence: Arc<PresenceRegistry>,
    pub router: Arc<RoomRouter>,
    pub typing: Arc<TypingStore>,
    pub pipeline: Arc<MessagePipeline>,
}

impl RealtimeServices {
    pub fn build(
        store: Arc<dyn ChatStore>,
        authenticator: Arc<dyn Authenticator>,
        publisher: Arc<dyn DomainEventPublisher>,
        clock: Arc<dyn Clock>,
        options: RealtimeOptions,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new(options.outbound_queue_capacity));
        let presence = Arc::new(PresenceRegistry::new(
            store.clone(),
            hub.clone(),
            clock.clone(),
            options.store_timeout,
        ));
        let router = Arc::new(RoomRouter::new(
            store.clone(),
            hub.clone(),
            clock.clone(),
            options.store_timeout,
        ));
        let typing = Arc::new(TypingStore::new(
            router.clone(),
            clock.clone(),
            options.typing_ttl,
        ));
        let pipeline = Arc::new(MessagePipeline::new(MessagePipelineDependencies {
            store,
            router: router.clone(),
            hub: hub.clone(),
            clock: clock.clone(),
            publisher,
            store_timeout: options.store_timeout,
        }));
        let gateway = Gateway::new(GatewayDependencies {
            authenticator,
            hub: hub.clone(),
            presence: presence.clone(),
            router: router.clone(),
            typing: typing.clone(),
            pipeline: pipeline.clone(),
            clock,
        });

        Self {
            gateway,
            hub,
            presence,
            router,
            typing,
            pipeline,
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayDependencies>,
}

impl Gateway {
    pub fn new(deps: GatewayDependencies) -> Self {
        Self {
            inner: Arc::new(deps),
        }
    }

    /// 认证并激活一条新连接
    pub async fn connect(&self, credential: Option<&str>) -> Result<Session, ApplicationError> {
        let connection_id = ConnectionId::generate();
        let mut state = ConnectionState::Connecting;

        let identity = match self.inner.authenticator.authenticate(credential) {
            Ok(identity) => identity,
            Err(err) => {
                state.advance(ConnectionState::Closed);
                tracing::warn!(connection_id = %connection_id, state = ?state, error = %err, "连接认证失败");
                return Err(err.into());
            }
        };
        state.advance(ConnectionState::Authenticated);
        tracing::debug!(user_id = %identity.user_id, connection_id = %connection_id, "连接已认证");

        let outbound = self.inner.hub.open(connection_id, identity.user_id);
        self.inner.presence.register(&identity, connection_id).await;
        state.advance(ConnectionState::Active);
        tracing::info!(
            user_id = %identity.user_id,
            connection_id = %connection_id,
            "连接已激活"
        );

        Ok(Session {
            gateway: self.clone(),
            connection_id,
            identity,
            state,
            events: Some(outbound.events),
            closed: outbound.closed,
        })
    }

    /// 关闭所有连接；各连接的任务会各自走断开流程
    pub fn shutdown(&self) -> usize {
        let closed = self.inner.hub.close_all();
        tracing::info!(closed, "网关关闭，已取消全部连接");
        closed
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.inner.presence
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.inner.authenticator
    }
}

/// 一条处于活动状态的连接
pub struct Session {
    gateway: Gateway,
    connection_id: ConnectionId,
    identity: Identity,
    state: ConnectionState,
    events: Option<mpsc::Receiver<ServerEvent>>,
    closed: CancellationToken,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 出站事件接收端，只能取走一次（交给写任务）
    pub fn take_outbound(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.events.take()
    }

    /// 被强制关闭（队列溢出、服务器关闭）时取消
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// 处理一条客户端事件。错误只回复给本连接。
    pub async fn dispatch(&self, event: ClientEvent) -> Dispatch {
        if self.state != ConnectionState::Active {
            return Dispatch::Close;
        }
        let deps = &self.gateway.inner;
        let name = event.name();

        let result = match event {
            ClientEvent::JoinConversation { conversation_id } => {
                match deps
                    .router
                    .join(&self.identity, self.connection_id, conversation_id)
                    .await
                {
                    Ok(_) => {
                        let now = deps.clock.now();
                        self.reply(ServerEvent::ConversationJoined {
                            conversation_id,
                            typing_user_ids: deps.typing.typing_users(conversation_id, now),
                            timestamp: now,
                        });
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                deps.router
                    .leave(&self.identity, self.connection_id, conversation_id);
                Ok(())
            }
            ClientEvent::TypingStart { conversation_id } => deps
                .typing
                .start(&self.identity, self.connection_id, conversation_id)
                .await
                .map(|_| ()),
            ClientEvent::TypingStop { conversation_id } => {
                deps.typing
                    .stop(&self.identity, self.connection_id, conversation_id);
                Ok(())
            }
            ClientEvent::NewMessage {
                conversation_id,
                content,
                message_type,
                reply_to_message_id,
            } => {
                let request = SendMessageRequest {
                    conversation_id,
                    content,
                    message_type,
                    reply_to_message_id,
                };
                if let Err(err) = deps
                    .pipeline
                    .send(&self.identity, self.connection_id, request)
                    .await
                {
                    tracing::warn!(
                        connection_id = %self.connection_id,
                        conversation_id = %conversation_id,
                        error = %err,
                        "消息发送失败"
                    );
                    self.reply(ServerEvent::MessageError {
                        conversation_id,
                        error: err.to_string(),
                    });
                }
                Ok(())
            }
            ClientEvent::MessageRead { message_id } => deps
                .pipeline
                .mark_read(&self.identity, self.connection_id, message_id)
                .await
                .map(|_| ()),
            ClientEvent::UpdateStatus { status } => deps
                .presence
                .set_status(self.identity.user_id, status, self.connection_id)
                .await
                .map(|_| ()),
            ClientEvent::UserOffline => return Dispatch::Close,
            ClientEvent::Ping => {
                self.reply(ServerEvent::Pong {
                    timestamp: deps.clock.now(),
                });
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::debug!(
                connection_id = %self.connection_id,
                event = name,
                code = err.code(),
                error = %err,
                "事件处理失败"
            );
            self.reply(ServerEvent::error(err.code(), err.to_string()));
        }
        Dispatch::Continue
    }

    /// 无法解析的帧：回复 `VALIDATION_ERROR`，连接继续
    pub fn reject_frame(&self, reason: impl std::fmt::Display) {
        let err = ApplicationError::validation(format!("malformed frame: {reason}"));
        self.reply(ServerEvent::error(err.code(), err.to_string()));
    }

    fn reply(&self, event: ServerEvent) {
        self.gateway.inner.hub.deliver(self.connection_id, event);
    }

    /// 断开流程。重复调用是空操作，返回是否真正执行。
    pub async fn close(&mut self) -> bool {
        if !self.state.advance(ConnectionState::Closed) {
            return false;
        }
        let rooms = self.release_local();
        let snapshot = self
            .gateway
            .inner
            .presence
            .deregister(self.identity.user_id, self.connection_id)
            .await;

        tracing::info!(
            user_id = %self.identity.user_id,
            connection_id = %self.connection_id,
            rooms,
            status = ?snapshot.map(|s| s.status),
            "连接已关闭"
        );
        true
    }

    /// 断开流程中的同步部分：清除输入状态、退出房间、注销出站队列
    fn release_local(&self) -> usize {
        let deps = &self.gateway.inner;
        deps.typing
            .stop_all_for_user(&self.identity, Some(self.connection_id));
        let rooms = deps.router.drop_connection(self.connection_id);
        deps.hub.close(self.connection_id);
        rooms.len()
    }
}

/// 会话未经 `close` 被丢弃（例如所在任务 panic）时补做断开流程
impl Drop for Session {
    fn drop(&mut self) {
        if !self.state.advance(ConnectionState::Closed) {
            return;
        }
        tracing::warn!(
            user_id = %self.identity.user_id,
            connection_id = %self.connection_id,
            "会话未正常关闭，补做断开流程"
        );
        self.release_local();

        let presence = self.gateway.inner.presence.clone();
        let user_id = self.identity.user_id;
        let connection_id = self.connection_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    presence.deregister(user_id, connection_id).await;
                });
            }
            Err(_) => tracing::error!(
                user_id = %user_id,
                connection_id = %connection_id,
                "没有可用的运行时，在线状态未注销"
            ),
        }
    }
}
