use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    InMemoryChatStore, RealtimeOptions, RealtimeServices, SystemClock, TracingEventPublisher,
};
use domain::{Conversation, ConversationId, ConversationType, Identity, Participant, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub jwt: Arc<JwtService>,
    pub store: Arc<InMemoryChatStore>,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    pub fn token_for(&self, identity: &Identity) -> String {
        self.jwt.generate_token(identity).expect("token")
    }

    pub async fn connect(&self, identity: &Identity) -> WsClient {
        let (socket, _) = connect_async(self.ws_url(Some(&self.token_for(identity))))
            .await
            .expect("websocket connect");
        socket
    }

    /// 创建一个包含给定用户的群聊
    pub async fn conversation_with(&self, members: &[&Identity]) -> ConversationId {
        let id = ConversationId::generate();
        let participants = members
            .iter()
            .map(|identity| Participant::new(id, identity.user_id))
            .collect();
        self.store
            .insert_conversation(
                Conversation::new(id, ConversationType::Group, participants).expect("conversation"),
            )
            .await;
        id
    }
}

pub fn identity(name: &str) -> Identity {
    Identity::new(UserId::generate(), name, "Staff")
}

pub async fn spawn_server() -> TestServer {
    let store = Arc::new(InMemoryChatStore::new());
    let jwt = Arc::new(JwtService::new(JwtConfig {
        secret: "test-secret-key-for-testing-only-32-chars".to_string(),
        expiration_hours: 24,
    }));
    let services = RealtimeServices::build(
        store.clone(),
        jwt.clone(),
        Arc::new(TracingEventPublisher),
        Arc::new(SystemClock),
        RealtimeOptions::default(),
    );
    let state = AppState::new(services.gateway, jwt.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router(state).into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        jwt,
        store,
        _shutdown: shutdown_tx,
    }
}

pub async fn send_event(socket: &mut WsClient, frame: Value) {
    socket
        .send(TungsteniteMessage::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取直到出现指定事件，跳过其他事件
pub async fn expect_event(socket: &mut WsClient, name: &str) -> Value {
    let wait = async {
        while let Some(frame) = socket.next().await {
            if let TungsteniteMessage::Text(text) = frame.expect("frame") {
                let value: Value = serde_json::from_str(text.as_str()).expect("json frame");
                if value["event"] == name {
                    return value;
                }
            }
        }
        panic!("socket closed before {name}");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}
