/// WebSocket subscription fan-out.
///
/// Sessions subscribe to one or more topics (a balance, a token, an order
/// book, ...); `SubscriptionManager` tracks per-topic session sets plus a
/// reverse per-session set so a disconnect can clean up in one pass instead
/// of scanning every topic map. Delivery itself goes through a
/// `tokio::sync::broadcast` channel the way the teacher's websocket module
/// fans out block/tx notifications — one channel, every session's receiver
/// filters to what it's actually subscribed to.
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::ref_id::Ref;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Balance,
    Token,
    Transfer,
    Orderbook,
    Fill,
    UserOrder,
    WaveName,
    Dmint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    pub key: Vec<u8>,
}

impl Topic {
    pub fn new(kind: TopicKind, key: impl Into<Vec<u8>>) -> Self {
        Self { kind, key: key.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum Notification {
    #[serde(rename = "balance.changed")]
    BalanceChange { scripthash: String, token_ref: String, balance: u64 },
    #[serde(rename = "token.changed")]
    TokenChange { token_ref: String },
    #[serde(rename = "transfer")]
    Transfer { token_ref: String, txid: String, amount: u64 },
    #[serde(rename = "orderbook.changed")]
    OrderbookChange { pair_id: String },
    #[serde(rename = "fill")]
    Fill { order_ref: String, price: u64, amount: u64 },
    #[serde(rename = "user_order.changed")]
    UserOrderChange { order_ref: String, maker_scripthash: String },
    #[serde(rename = "wave_name.changed")]
    WaveNameChange { label: String },
    #[serde(rename = "dmint.updated")]
    DmintUpdate { token_ref: String },
}

struct Inner {
    topic_sessions: HashMap<Topic, HashSet<SessionId>>,
    session_topics: HashMap<SessionId, HashSet<Topic>>,
}

pub struct SubscriptionManager {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<(SessionId, Notification)>,
}

impl SubscriptionManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            inner: RwLock::new(Inner {
                topic_sessions: HashMap::new(),
                session_topics: HashMap::new(),
            }),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(SessionId, Notification)> {
        self.sender.subscribe()
    }

    pub fn add(&self, session: SessionId, topic: Topic) {
        let mut inner = self.inner.write().unwrap();
        inner
            .topic_sessions
            .entry(topic.clone())
            .or_default()
            .insert(session);
        inner.session_topics.entry(session).or_default().insert(topic);
    }

    pub fn remove(&self, session: SessionId, topic: &Topic) {
        let mut inner = self.inner.write().unwrap();
        if let Some(sessions) = inner.topic_sessions.get_mut(topic) {
            sessions.remove(&session);
            if sessions.is_empty() {
                inner.topic_sessions.remove(topic);
            }
        }
        if let Some(topics) = inner.session_topics.get_mut(&session) {
            topics.remove(topic);
        }
    }

    /// Drains every topic a disconnecting session held.
    pub fn unsubscribe_session(&self, session: SessionId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(topics) = inner.session_topics.remove(&session) {
            for topic in topics {
                if let Some(sessions) = inner.topic_sessions.get_mut(&topic) {
                    sessions.remove(&session);
                    if sessions.is_empty() {
                        inner.topic_sessions.remove(&topic);
                    }
                }
            }
        }
    }

    fn sessions_for(&self, topic: &Topic) -> Vec<SessionId> {
        self.inner
            .read()
            .unwrap()
            .topic_sessions
            .get(topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn publish(&self, topic: &Topic, notification: Notification) {
        for session in self.sessions_for(topic) {
            // An error here means no receivers are live right now; that's
            // fine, the channel just drops the message.
            let _ = self.sender.send((session, notification.clone()));
        }
    }

    pub fn notify_balance_change(&self, scripthash: &[u8; 32], token_ref: &Ref, balance: u64) {
        let topic = Topic::new(TopicKind::Balance, token_ref.to_bytes().to_vec());
        self.publish(
            &topic,
            Notification::BalanceChange {
                scripthash: hex::encode(scripthash),
                token_ref: token_ref.to_string(),
                balance,
            },
        );
    }

    pub fn notify_token_change(&self, token_ref: &Ref) {
        let topic = Topic::new(TopicKind::Token, token_ref.to_bytes().to_vec());
        self.publish(&topic, Notification::TokenChange { token_ref: token_ref.to_string() });
    }

    pub fn notify_transfer(&self, token_ref: &Ref, txid: &[u8; 32], amount: u64) {
        let topic = Topic::new(TopicKind::Transfer, token_ref.to_bytes().to_vec());
        self.publish(
            &topic,
            Notification::Transfer {
                token_ref: token_ref.to_string(),
                txid: hex::encode(txid),
                amount,
            },
        );
    }

    pub fn notify_orderbook_change(&self, pair_id: &[u8; 32]) {
        let topic = Topic::new(TopicKind::Orderbook, pair_id.to_vec());
        self.publish(&topic, Notification::OrderbookChange { pair_id: hex::encode(pair_id) });
    }

    pub fn notify_fill(&self, order_ref: &Ref, price: u64, amount: u64) {
        let topic = Topic::new(TopicKind::Fill, order_ref.to_bytes().to_vec());
        self.publish(
            &topic,
            Notification::Fill { order_ref: order_ref.to_string(), price, amount },
        );
    }

    pub fn notify_user_order(&self, order_ref: &Ref, maker_scripthash: &[u8; 32]) {
        let topic = Topic::new(TopicKind::UserOrder, maker_scripthash.to_vec());
        self.publish(
            &topic,
            Notification::UserOrderChange {
                order_ref: order_ref.to_string(),
                maker_scripthash: hex::encode(maker_scripthash),
            },
        );
    }

    pub fn notify_wave_name_change(&self, name_hash: &[u8; 32], label: &str) {
        let topic = Topic::new(TopicKind::WaveName, name_hash.to_vec());
        self.publish(&topic, Notification::WaveNameChange { label: label.to_string() });
    }

    pub fn notify_dmint_update(&self, token_ref: &Ref) {
        let topic = Topic::new(TopicKind::Dmint, token_ref.to_bytes().to_vec());
        self.publish(&topic, Notification::DmintUpdate { token_ref: token_ref.to_string() });
    }

    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap();
        (inner.topic_sessions.len(), inner.session_topics.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_unsubscribe_session_cleans_both_maps() {
        let mgr = SubscriptionManager::new(16);
        let topic = Topic::new(TopicKind::Token, vec![1, 2, 3]);
        mgr.add(7, topic.clone());
        assert_eq!(mgr.sessions_for(&topic), vec![7]);

        mgr.unsubscribe_session(7);
        assert!(mgr.sessions_for(&topic).is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_subscribed_receiver() {
        let mgr = SubscriptionManager::new(16);
        let mut rx = mgr.subscribe();
        let token_ref = Ref::new([4u8; 32], 0);
        mgr.add(1, Topic::new(TopicKind::Token, token_ref.to_bytes().to_vec()));

        mgr.notify_token_change(&token_ref);
        let (session, notification) = rx.recv().await.unwrap();
        assert_eq!(session, 1);
        match notification {
            Notification::TokenChange { token_ref: t } => assert_eq!(t, token_ref.to_string()),
            _ => panic!("wrong notification kind"),
        }
    }
}
