//! Reliable delivery of [`RawMessage`]s over a fire-and-forget transport.
//!
//! All retry state lives in the stored row (`send_count`, `last_sent`,
//! `next_attempt_at`, `sent`, `terminal`). A failed attempt stores the time of
//! the next one, computed from [`DeliveryPolicy::backoff`], so a sweep selects
//! due messages directly in SQL. A restarted node resumes resending from the database
//! without any per-message timer.
//!
//! Sweeps attempt due messages in parallel. An in-flight set ensures a
//! message is never attempted twice at the same time.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use concord_shared::identity::Identity;
use concord_shared::protocol::{Envelope, SignedEnvelope};
use concord_shared::types::{InstallationId, MessageId};
use concord_store::RawMessage;

use crate::error::CoreError;
use crate::now_ms;
use crate::transport::{Encryptor, Transport};
use crate::SharedDatabase;

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Wait after the first failure.
    pub backoff_initial_ms: u64,
    /// Upper bound for the exponential wait.
    pub backoff_max_ms: u64,
    /// How often [`DeliveryQueue::run`] sweeps.
    pub sweep_interval: Duration,
    /// Maximum number of rows loaded per sweep.
    pub batch_limit: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            backoff_initial_ms: 1_000,
            backoff_max_ms: 5 * 60 * 1_000,
            sweep_interval: Duration::from_secs(5),
            batch_limit: 100,
        }
    }
}

impl DeliveryPolicy {
    /// Minimum time between the last attempt and the next one.
    ///
    /// `0` for a message that never failed, then `initial * 2^(n-1)` capped
    /// at `backoff_max_ms`.
    pub fn backoff(&self, send_count: u32) -> u64 {
        if send_count == 0 {
            return 0;
        }
        let exponent = (send_count - 1).min(32);
        self.backoff_initial_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms)
    }

    /// When a message that has now failed `send_count` times may be retried.
    pub fn next_attempt_at(&self, send_count: u32, now: u64) -> u64 {
        now.saturating_add(self.backoff(send_count))
    }

    pub fn is_due(&self, message: &RawMessage, now: u64) -> bool {
        !message.sent
            && !message.terminal
            && message.resend_automatically
            && now >= message.next_attempt_at
    }
}

/// What actually goes on the wire: the sealed envelope, optionally encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Frame {
    Plain(Vec<u8>),
    Encrypted(Vec<u8>),
}

impl Frame {
    /// Recover the signed envelope carried by a frame received on `topic`.
    pub(crate) fn open(
        bytes: &[u8],
        topic: &str,
        encryptor: &dyn Encryptor,
    ) -> Result<SignedEnvelope, CoreError> {
        let sealed = match bincode::deserialize::<Frame>(bytes)? {
            Frame::Plain(sealed) => sealed,
            Frame::Encrypted(ciphertext) => encryptor.decrypt(topic, &ciphertext)?,
        };
        Ok(SignedEnvelope::from_bytes(&sealed)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Removes a message from the in-flight set when its attempt ends.
struct InFlight<'a> {
    set: &'a StdMutex<HashSet<MessageId>>,
    id: MessageId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct DeliveryQueue {
    db: SharedDatabase,
    transport: Arc<dyn Transport>,
    encryptor: Arc<dyn Encryptor>,
    identity: Arc<Identity>,
    installation_id: InstallationId,
    policy: DeliveryPolicy,
    in_flight: StdMutex<HashSet<MessageId>>,
    /// Bumped after every attempt so waiters re-check their message.
    progress: watch::Sender<u64>,
}

impl DeliveryQueue {
    pub fn new(
        db: SharedDatabase,
        transport: Arc<dyn Transport>,
        encryptor: Arc<dyn Encryptor>,
        identity: Arc<Identity>,
        installation_id: InstallationId,
        policy: DeliveryPolicy,
    ) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            db,
            transport,
            encryptor,
            identity,
            installation_id,
            policy,
            in_flight: StdMutex::new(HashSet::new()),
            progress,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Persist a message and make one immediate attempt.
    ///
    /// A failed attempt is not an error: the message stays queued for the
    /// next sweep (or is terminal if it does not resend automatically).
    pub async fn send(&self, mut message: RawMessage) -> Result<MessageId, CoreError> {
        message.send_count = 0;
        message.sent = false;
        message.terminal = false;
        message.last_sent = 0;
        message.next_attempt_at = 0;

        let id = message.id;
        self.db.lock().await.insert_raw_message(&message)?;
        debug!(
            message = %id,
            kind = ?message.message_type,
            chat = %message.local_chat_id,
            "Queued message"
        );

        self.attempt(message, now_ms()).await?;
        Ok(id)
    }

    /// Attempt every due message once, in parallel, up to `batch_limit`.
    pub async fn sweep(&self, now: u64) -> Result<SweepReport, CoreError> {
        let due = self
            .db
            .lock()
            .await
            .list_due_raw_messages(now, self.policy.batch_limit)?;

        if due.is_empty() {
            return Ok(SweepReport::default());
        }

        let results = join_all(due.into_iter().map(|m| self.attempt(m, now))).await;

        let mut report = SweepReport::default();
        for result in results {
            match result? {
                Some(true) => {
                    report.attempted += 1;
                    report.delivered += 1;
                }
                Some(false) => report.attempted += 1,
                None => {}
            }
        }

        debug!(attempted = report.attempted, delivered = report.delivered, "Sweep finished");
        Ok(report)
    }

    /// Stop retrying a message. Waiters observe it as undelivered.
    pub async fn mark_terminal(&self, id: &MessageId) -> Result<(), CoreError> {
        if !self.db.lock().await.mark_raw_message_terminal(id)? {
            return Err(CoreError::NotFound(format!("message {id}")));
        }
        self.progress.send_modify(|n| *n += 1);
        Ok(())
    }

    /// Resolve once the message is sent (`true`) or terminal without having
    /// been sent (`false`).
    ///
    /// Dropping the returned future only stops waiting; the message keeps
    /// being retried unless it is marked terminal.
    pub async fn wait_for_delivery(&self, id: &MessageId) -> Result<bool, CoreError> {
        let mut progress = self.progress.subscribe();
        loop {
            let message = self
                .db
                .lock()
                .await
                .find_raw_message(id)?
                .ok_or_else(|| CoreError::NotFound(format!("message {id}")))?;
            if message.sent {
                return Ok(true);
            }
            if message.terminal {
                return Ok(false);
            }
            if progress.changed().await.is_err() {
                return Err(CoreError::Transport("delivery queue dropped".to_string()));
            }
        }
    }

    /// Sweep every `sweep_interval` until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.policy.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.policy.sweep_interval, "Delivery queue running");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(now_ms()).await {
                        warn!(error = %e, "Delivery sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Delivery queue stopped");
    }

    fn claim(&self, id: MessageId) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            id,
        })
    }

    /// One delivery attempt. `None` if the message was skipped because it is
    /// already in flight or no longer pending; otherwise whether it went out.
    async fn attempt(&self, message: RawMessage, now: u64) -> Result<Option<bool>, CoreError> {
        let Some(_claim) = self.claim(message.id) else {
            debug!(message = %message.id, "Already in flight");
            return Ok(None);
        };

        let current = match self.db.lock().await.find_raw_message(&message.id)? {
            Some(m) if !m.sent && !m.terminal => m,
            _ => return Ok(None),
        };

        let outcome = self.dispatch(&current, now).await;

        {
            let db = self.db.lock().await;
            match &outcome {
                Ok(()) => {
                    db.mark_raw_message_sent(&current.id, now)?;
                    debug!(message = %current.id, "Message sent");
                }
                Err(e) => {
                    let next = self.policy.next_attempt_at(current.send_count + 1, now);
                    db.record_raw_message_failure(&current.id, now, next)?;
                    warn!(
                        message = %current.id,
                        attempts = current.send_count + 1,
                        error = %e,
                        "Send attempt failed"
                    );
                }
            }
            if !current.resend_automatically {
                db.mark_raw_message_terminal(&current.id)?;
            }
        }

        self.progress.send_modify(|n| *n += 1);
        Ok(Some(outcome.is_ok()))
    }

    /// Seal, optionally encrypt, and publish on every destination topic.
    async fn dispatch(&self, message: &RawMessage, now: u64) -> Result<(), CoreError> {
        let envelope = Envelope {
            message_id: message.id,
            sender: self.identity.user_id(),
            origin_installation: self.installation_id,
            target_installation: message.target_installation,
            chat_id: (!message.skip_group_message_wrap).then(|| message.local_chat_id.clone()),
            timestamp_ms: now,
            payload: message.payload.clone(),
        };
        let sealed = SignedEnvelope::seal(&self.identity, &envelope)?.to_bytes()?;

        if message.send_push_notification {
            debug!(message = %message.id, "Push notification requested");
        }

        for topic in self.topics_for(message) {
            let frame = if message.skip_encryption {
                Frame::Plain(sealed.clone())
            } else {
                Frame::Encrypted(self.encryptor.encrypt(&topic, &sealed)?)
            };
            self.transport
                .publish(&topic, bincode::serialize(&frame)?)
                .await?;
        }
        Ok(())
    }

    /// Installation-targeted messages go to our installations topic,
    /// personal-topic messages without recipients to our own personal topic,
    /// unicast messages to each recipient's, and everything else to the chat
    /// topic.
    fn topics_for(&self, message: &RawMessage) -> Vec<String> {
        let own = self.identity.user_id();
        if message.target_installation.is_some() {
            return vec![own.installations_topic()];
        }
        if message.send_on_personal_topic && message.recipients.is_empty() {
            return vec![own.personal_topic()];
        }
        if !message.recipients.is_empty() {
            let unique: BTreeSet<_> = message.recipients.iter().collect();
            return unique.into_iter().map(|r| r.personal_topic()).collect();
        }
        vec![message.local_chat_id.clone()]
    }
}
