use application::{Dispatch, Session};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 连接
///
/// 读循环在当前任务中把客户端帧交给网关会话；写任务统一负责所有
/// 对 socket 的写操作（出站事件与 pong）。任一方结束都会走会话的断开流程，
/// 且只执行一次。
pub struct WebSocketConnection {
    socket: WebSocket,
    session: Session,
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, session: Session) -> Self {
        Self { socket, session }
    }

    pub async fn run(self) {
        let Self {
            socket,
            mut session,
        } = self;
        let connection_id = session.connection_id();
        let Some(mut outbound) = session.take_outbound() else {
            session.close().await;
            return;
        };
        let closed = session.closed();

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let send_task = {
            let closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        Some(cmd) = cmd_rx.recv() => match cmd {
                            WsCommand::SendPong(data) => WsMessage::Pong(data),
                        },
                        event = outbound.recv() => match event {
                            Some(event) => match encode(&event) {
                                Some(text) => WsMessage::Text(text.into()),
                                None => continue,
                            },
                            None => break,
                        },
                        _ = closed.cancelled() => break,
                    };
                    if sender.send(frame).await.is_err() {
                        tracing::debug!(connection_id = %connection_id, "WebSocket 写入失败");
                        closed.cancel();
                        break;
                    }
                }
                let _ = sender.send(WsMessage::Close(None)).await;
            })
        };

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                frame = incoming.next() => match frame {
                    Some(Ok(message)) => {
                        if handle_incoming(&session, message, &cmd_tx).await == Dispatch::Close {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket 读取失败");
                        break;
                    }
                    None => break,
                },
            }
        }

        session.close().await;
        if let Err(err) = send_task.await {
            tracing::warn!(connection_id = %connection_id, error = %err, "WebSocket 写任务异常结束");
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match event.to_json() {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(event = event.name(), error = %err, "事件序列化失败");
            None
        }
    }
}

/// 处理一帧客户端消息
async fn handle_incoming(
    session: &Session,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Dispatch {
    match message {
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %session.connection_id(), "WebSocket收到关闭消息");
            Dispatch::Close
        }
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                return Dispatch::Close;
            }
            Dispatch::Continue
        }
        WsMessage::Pong(_) => Dispatch::Continue,
        WsMessage::Text(text) => match ClientEvent::from_json(text.as_str()) {
            Ok(event) => session.dispatch(event).await,
            Err(err) => {
                session.reject_frame(err);
                Dispatch::Continue
            }
        },
        WsMessage::Binary(_) => {
            session.reject_frame("binary frames are not supported");
            Dispatch::Continue
        }
    }
}
