//! Stubs shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposter_core::{
    Channel, ChannelId, Delivery, DeliveryError, Group, GroupId, NewSendRecord, RecordId,
    SendRecord, Template, TemplateId,
};
use reposter_store::{NewGroup, NewTemplate, SqliteStore, Store, StoreError};
use tokio::sync::Semaphore;

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// One observed gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(String),
    Delete(String, String),
    Pin(String, String),
}

/// Delivery stub that records calls and hands out ids 100, 101, ...
#[derive(Debug)]
pub struct RecordingDelivery {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    send_failures: AtomicUsize,
    fail_delete: AtomicBool,
    fail_pin: AtomicBool,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(100),
            send_failures: AtomicUsize::new(0),
            fail_delete: AtomicBool::new(false),
            fail_pin: AtomicBool::new(false),
            gate: None,
        }
    }

    /// Every send blocks until the returned semaphore gets a permit.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut delivery = Self::new();
        delivery.gate = Some(Arc::clone(&gate));
        (delivery, gate)
    }

    /// Fail the next `n` sends.
    pub fn fail_sends(&self, n: usize) {
        self.send_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, on: bool) {
        self.fail_delete.store(on, Ordering::SeqCst);
    }

    pub fn fail_pin(&self, on: bool) {
        self.fail_pin.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(chat) => Some(chat),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, chat_id: &str, _template: &Template) -> Result<String, DeliveryError> {
        self.push(Call::Send(chat_id.to_string()));
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let failing = self
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn delete(&self, chat_id: &str, message_id: &str) -> Result<(), DeliveryError> {
        self.push(Call::Delete(chat_id.to_string(), message_id.to_string()));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("message can't be deleted".into()));
        }
        Ok(())
    }

    async fn pin(&self, chat_id: &str, message_id: &str) -> Result<(), DeliveryError> {
        self.push(Call::Pin(chat_id.to_string(), message_id.to_string()));
        if self.fail_pin.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("not enough rights".into()));
        }
        Ok(())
    }
}

/// In-memory store seeded with one template, one frequency group (60 min)
/// and one channel per chat id.
pub struct Fixture {
    pub store: Arc<SqliteStore>,
    pub group_id: GroupId,
    pub template_id: TemplateId,
    pub channels: Vec<Channel>,
}

pub fn fixture(chats: &[&str]) -> Fixture {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let template = store
        .create_template(&NewTemplate {
            title: "promo".into(),
            content: "Daily digest".into(),
            ..Default::default()
        })
        .unwrap();
    let group = store
        .create_group(&NewGroup::every("digest", template.id, 60))
        .unwrap();
    let channels = chats
        .iter()
        .map(|chat| store.add_channel(group.id, chat, chat).unwrap())
        .collect();
    Fixture {
        store,
        group_id: group.id,
        template_id: template.id,
        channels,
    }
}

impl Fixture {
    pub fn group(&self) -> Group {
        self.store.group(self.group_id).unwrap()
    }

    pub fn pending(&self, chat: &str, kind: reposter_core::SendKind, at: DateTime<Utc>) -> RecordId {
        self.store
            .create_record(&NewSendRecord::pending(self.group_id, chat, kind, at))
            .unwrap()
    }
}

/// Delegating store whose history lookups can be made to fail.
pub struct FlakyStore {
    inner: Arc<SqliteStore>,
    fail_history: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_history: AtomicBool::new(false),
        }
    }

    pub fn fail_history(&self, on: bool) {
        self.fail_history.store(on, Ordering::SeqCst);
    }
}

impl Store for FlakyStore {
    fn active_groups(&self) -> reposter_store::Result<Vec<Group>> {
        self.inner.active_groups()
    }

    fn group(&self, id: GroupId) -> reposter_store::Result<Group> {
        self.inner.group(id)
    }

    fn channels_for_group(&self, id: GroupId) -> reposter_store::Result<Vec<Channel>> {
        self.inner.channels_for_group(id)
    }

    fn template(&self, id: TemplateId) -> reposter_store::Result<Template> {
        self.inner.template(id)
    }

    fn create_record(&self, record: &NewSendRecord) -> reposter_store::Result<RecordId> {
        self.inner.create_record(record)
    }

    fn record(&self, id: RecordId) -> reposter_store::Result<SendRecord> {
        self.inner.record(id)
    }

    fn update_record(&self, record: &SendRecord) -> reposter_store::Result<()> {
        self.inner.update_record(record)
    }

    fn due_records(&self, now: DateTime<Utc>) -> reposter_store::Result<Vec<SendRecord>> {
        self.inner.due_records(now)
    }

    fn in_flight_records(
        &self,
        group: GroupId,
        chat_id: &str,
    ) -> reposter_store::Result<Vec<SendRecord>> {
        self.inner.in_flight_records(group, chat_id)
    }

    fn recent_records(&self, group: GroupId, limit: usize) -> reposter_store::Result<Vec<SendRecord>> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.recent_records(group, limit)
    }

    fn set_channel_last_message(
        &self,
        channel: ChannelId,
        message_id: Option<&str>,
    ) -> reposter_store::Result<()> {
        self.inner.set_channel_last_message(channel, message_id)
    }

    fn purge_stale_pending(&self) -> reposter_store::Result<usize> {
        self.inner.purge_stale_pending()
    }
}
