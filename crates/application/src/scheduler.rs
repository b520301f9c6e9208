//! 输入状态定时清扫
//!
//! 固定周期调用 `TypingStore::sweep`。关闭时取消令牌并等待任务退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{clock::Clock, typing::TypingStore};

pub struct TypingSweeper {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TypingSweeper {
    pub fn start(typing: Arc<TypingStore>, clock: Arc<dyn Clock>, period: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period_secs = period.as_secs(), "输入状态清扫任务启动");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        typing.sweep(clock.now());
                    }
                }
            }
            tracing::info!("输入状态清扫任务停止");
        });

        Self { shutdown, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "清扫任务异常退出");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock, hub::ConnectionHub, memory::InMemoryChatStore, rooms::RoomRouter,
    };
    use chrono::Duration as ChronoDuration;
    use domain::{Conversation, ConversationId, ConversationType, Identity, Participant, UserId};

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_schedule_and_stops_cleanly() {
        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(ConnectionHub::new(8));
        let clock = Arc::new(ManualClock::default());
        let alice = Identity::new(UserId::generate(), "alice", "Staff");
        let conversation_id = ConversationId::generate();
        store
            .insert_conversation(
                Conversation::new(
                    conversation_id,
                    ConversationType::Group,
                    vec![Participant::new(conversation_id, alice.user_id)],
                )
                .unwrap(),
            )
            .await;
        let router = Arc::new(RoomRouter::new(
            store,
            hub,
            clock.clone(),
            Duration::from_secs(1),
        ));
        let typing = Arc::new(TypingStore::new(
            router,
            clock.clone(),
            Duration::from_secs(10),
        ));
        typing
            .start(&alice, domain::ConnectionId::generate(), conversation_id)
            .await
            .unwrap();

        let sweeper = TypingSweeper::start(typing.clone(), clock.clone(), Duration::from_secs(30));

        // 第一次清扫时记录仍有效
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(typing.len(), 1);

        clock.advance(ChronoDuration::seconds(15));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(typing.is_empty());

        assert!(sweeper.is_running());
        sweeper.shutdown().await;
    }
}
