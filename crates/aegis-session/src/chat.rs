//! Chat threads: persistence, simulated replies, read receipts.
//!
//! Threads live entirely in the local cache under `chat_<contactId>`.
//! Replies from seed contacts are simulated: the pure responder produces
//! the body, and delivery is a scheduled task that can be cancelled if the
//! thread is cleared or the contact deleted before it fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use aegis_shared::{ChatMessage, Contact};
use aegis_store::Cache;

use crate::contacts::ContactStore;
use crate::error::Result;
use crate::events::ChatEvent;
use crate::responder;

/// Delivery timing for simulated replies and read receipts.
///
/// The timing is simulation detail, not correctness: tests inject
/// [`ImmediateDelays`] to make delivery synchronous-ish.
pub trait DelayStrategy: Send + Sync {
    fn reply_delay(&self) -> Duration;
    fn read_receipt_delay(&self) -> Duration;
}

/// Production timing: replies land after 1.5-2.5 s, receipts after 1 s.
pub struct SimulatedDelays;

impl DelayStrategy for SimulatedDelays {
    fn reply_delay(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(1500..=2500))
    }

    fn read_receipt_delay(&self) -> Duration {
        Duration::from_millis(1000)
    }
}

/// Zero delays, for tests.
pub struct ImmediateDelays;

impl DelayStrategy for ImmediateDelays {
    fn reply_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn read_receipt_delay(&self) -> Duration {
        Duration::ZERO
    }
}

impl ContactStore {
    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Open the chat thread for `contact`, lazily seeding it with a welcome
    /// message on first open.  Also records the interaction in the recents
    /// list.
    pub fn open_chat(&self, contact: &Contact) -> Result<Vec<ChatMessage>> {
        let thread = {
            let _guard = self.write_guard();
            let mut thread = self.cache.thread(&contact.id)?;
            if thread.is_empty() {
                thread.push(ChatMessage::incoming(&contact.name, welcome_text(contact)));
                self.cache.put_thread(&contact.id, &thread)?;
            }
            thread
        };
        self.add_to_recent(contact)?;
        Ok(thread)
    }

    /// Append an outgoing message and persist it immediately.
    ///
    /// For seed contacts a simulated counterpart reply is scheduled after
    /// the strategy's reply delay; a read receipt for the sent message is
    /// scheduled for every contact.  Must be called from within a tokio
    /// runtime.
    pub fn send_message(
        &self,
        contact: &Contact,
        text: &str,
        reply_to: Option<Uuid>,
    ) -> Result<ChatMessage> {
        let message = ChatMessage::outgoing(text, reply_to);

        {
            let _guard = self.write_guard();
            let mut thread = self.cache.thread(&contact.id)?;
            thread.push(message.clone());
            self.cache.put_thread(&contact.id, &thread)?;
        }
        self.notify(&contact.id);

        self.schedule_read_receipt(contact, message.id);
        if !contact.is_user_added {
            self.schedule_reply(contact, text);
        }

        Ok(message)
    }

    /// Remove a single message.  Returns `false` when no message matched.
    pub fn delete_message(&self, contact_id: &str, message_id: Uuid) -> Result<bool> {
        {
            let _guard = self.write_guard();
            let mut thread = self.cache.thread(contact_id)?;
            let before = thread.len();
            thread.retain(|m| m.id != message_id);
            if thread.len() == before {
                return Ok(false);
            }
            self.cache.put_thread(contact_id, &thread)?;
        }
        self.notify(contact_id);
        Ok(true)
    }

    /// Drop the entire thread, cancelling any pending simulated delivery so
    /// deleted data cannot be resurrected by a late timer.
    pub fn clear_chat(&self, contact_id: &str) -> Result<()> {
        self.cancel_pending(contact_id);
        {
            let _guard = self.write_guard();
            self.cache.remove_thread(contact_id)?;
        }
        self.notify(contact_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduled delivery
    // ------------------------------------------------------------------

    fn schedule_read_receipt(&self, contact: &Contact, message_id: Uuid) {
        let cache = Arc::clone(&self.cache);
        let write_lock = Arc::clone(&self.write_lock);
        let events = self.events.clone();
        let delay = self.delays.read_receipt_delay();
        let contact_id = contact.id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let _guard = write_lock.lock().unwrap_or_else(|e| e.into_inner());
                mark_read(&cache, &contact_id, message_id);
            }
            let _ = events.send(ChatEvent::ThreadUpdated { contact_id });
        });
        self.track_timer(&contact.id, handle);
    }

    fn schedule_reply(&self, contact: &Contact, outgoing_text: &str) {
        let reply = responder::respond(outgoing_text, contact, Local::now().hour());
        let mut message = ChatMessage::incoming(&contact.name, reply.text);
        message.links = reply.links;

        let cache = Arc::clone(&self.cache);
        let write_lock = Arc::clone(&self.write_lock);
        let events = self.events.clone();
        let delay = self.delays.reply_delay();
        let contact_id = contact.id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let _guard = write_lock.lock().unwrap_or_else(|e| e.into_inner());
                deliver_reply(&cache, &contact_id, message);
            }
            let _ = events.send(ChatEvent::ThreadUpdated { contact_id });
        });
        self.track_timer(&contact.id, handle);
    }

    fn track_timer(&self, contact_id: &str, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let entry = timers.entry(contact_id.to_string()).or_default();
        entry.retain(|h| !h.is_finished());
        entry.push(handle);
    }

    fn notify(&self, contact_id: &str) {
        let _ = self.events.send(ChatEvent::ThreadUpdated {
            contact_id: contact_id.to_string(),
        });
    }
}

fn mark_read(cache: &Cache, contact_id: &str, message_id: Uuid) {
    match cache.thread(contact_id) {
        Ok(mut thread) => {
            let Some(message) = thread.iter_mut().find(|m| m.id == message_id) else {
                return;
            };
            message.read = true;
            if let Err(e) = cache.put_thread(contact_id, &thread) {
                warn!(contact = %contact_id, error = %e, "could not persist read receipt");
            }
        }
        Err(e) => warn!(contact = %contact_id, error = %e, "could not load thread for read receipt"),
    }
}

fn deliver_reply(cache: &Cache, contact_id: &str, message: ChatMessage) {
    match cache.thread(contact_id) {
        Ok(mut thread) => {
            // A cleared thread means the conversation is gone; do not
            // resurrect it with a late reply.
            if thread.is_empty() {
                return;
            }
            thread.push(message);
            if let Err(e) = cache.put_thread(contact_id, &thread) {
                warn!(contact = %contact_id, error = %e, "could not persist simulated reply");
            }
        }
        Err(e) => warn!(contact = %contact_id, error = %e, "could not load thread for simulated reply"),
    }
}

fn welcome_text(contact: &Contact) -> String {
    if contact.is_user_added {
        format!(
            "You added {} as a personal emergency contact. Messages you send here stay on \
             this device.",
            contact.name
        )
    } else {
        format!(
            "Hello, this is {}. How can we help you today?",
            contact.name
        )
    }
}
