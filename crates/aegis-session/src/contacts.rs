//! The contact directory: seed data, user-added contacts, recents.
//!
//! Everything here is local-only; the cache is the authority.  Chat-thread
//! operations on [`ContactStore`] live in [`crate::chat`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use aegis_shared::{Contact, ContactCategory, ContactPriority};
use aegis_store::{keys, Cache, CacheOp, StoreError};

use crate::chat::{DelayStrategy, SimulatedDelays};
use crate::error::{Result, SessionError};
use crate::events::ChatEvent;

/// Upper bound on the most-recently-contacted list.
pub const MAX_RECENT_CONTACTS: usize = 5;

/// Capacity of the chat-event fanout.
const EVENT_CAPACITY: usize = 32;

/// Input for [`ContactStore::create_contact`].
#[derive(Debug, Clone)]
pub struct NewContact {
    pub name: String,
    pub number: String,
    pub category: ContactCategory,
    pub priority: ContactPriority,
}

/// Local store for the helpline directory and per-contact chat threads.
///
/// Owns the `contacts`, `recentContacts` and `chat_<id>` cache namespaces.
/// Simulated-reply and read-receipt timers are tracked per contact so that
/// clearing a thread or deleting a contact cancels anything still pending.
pub struct ContactStore {
    pub(crate) cache: Arc<Cache>,
    pub(crate) delays: Arc<dyn DelayStrategy>,
    pub(crate) timers: Arc<Mutex<HashMap<String, Vec<JoinHandle<()>>>>>,
    pub(crate) events: broadcast::Sender<ChatEvent>,
    /// Serializes read-modify-write cycles on this store's cache keys so a
    /// scheduled delivery cannot lose an update racing a foreground call.
    pub(crate) write_lock: Arc<Mutex<()>>,
}

impl ContactStore {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self::with_delays(cache, Arc::new(SimulatedDelays))
    }

    /// Construct with an explicit delay strategy (tests pass
    /// [`ImmediateDelays`](crate::ImmediateDelays)).
    pub fn with_delays(cache: Arc<Cache>, delays: Arc<dyn DelayStrategy>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cache,
            delays,
            timers: Arc::new(Mutex::new(HashMap::new())),
            events,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn write_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to thread-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------

    /// Load the contact directory, seeding it on first launch.
    pub fn load_contacts(&self) -> Result<Vec<Contact>> {
        if let Some(contacts) = self.cache.contacts()? {
            return Ok(contacts);
        }

        let seed = seed_contacts();
        self.cache.put_contacts(&seed)?;
        info!(count = seed.len(), "seeded contact directory");
        Ok(seed)
    }

    /// Create a user-added contact.
    pub fn create_contact(&self, new: NewContact) -> Result<Contact> {
        let name = new.name.trim();
        let number = new.number.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidInput("contact name is required".into()));
        }
        if number.is_empty() {
            return Err(SessionError::InvalidInput(
                "contact number is required".into(),
            ));
        }
        if new.category.label().trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "contact category is required".into(),
            ));
        }

        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            category: new.category,
            number: number.to_string(),
            priority: new.priority,
            online: false,
            is_user_added: true,
        };

        let _guard = self.write_guard();
        let mut contacts = self.load_contacts()?;
        contacts.push(contact.clone());
        self.cache.put_contacts(&contacts)?;

        info!(contact = %contact.id, name = %contact.name, "contact created");
        Ok(contact)
    }

    /// Delete a user-added contact together with its recent-list entry and
    /// chat thread, atomically.  Seed contacts are never deleted; the call
    /// is a no-op returning `false`.
    pub fn delete_contact(&self, id: &str) -> Result<bool> {
        let contacts = self.load_contacts()?;
        let Some(target) = contacts.iter().find(|c| c.id == id) else {
            return Ok(false);
        };
        if !target.is_user_added {
            debug!(contact = %id, "refusing to delete seed contact");
            return Ok(false);
        }

        self.cancel_pending(id);

        let _guard = self.write_guard();
        let remaining: Vec<Contact> = contacts.iter().filter(|c| c.id != id).cloned().collect();
        let recents: Vec<Contact> = self
            .recent_contacts()?
            .into_iter()
            .filter(|c| c.id != id)
            .collect();

        self.cache.apply(&[
            CacheOp::put(
                keys::CONTACTS,
                serde_json::to_string(&remaining).map_err(StoreError::from)?,
            ),
            CacheOp::put(
                keys::RECENT_CONTACTS,
                serde_json::to_string(&recents).map_err(StoreError::from)?,
            ),
            CacheOp::remove(keys::chat(id)),
        ])?;

        let _ = self.events.send(ChatEvent::ThreadUpdated {
            contact_id: id.to_string(),
        });
        info!(contact = %id, "contact deleted");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Recents
    // ------------------------------------------------------------------

    /// The most-recently-contacted list, newest first.
    pub fn recent_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.cache.recent_contacts()?)
    }

    /// Record an interaction with `contact`: move (or insert) it to the
    /// front of the recents list and trim to [`MAX_RECENT_CONTACTS`].
    pub fn add_to_recent(&self, contact: &Contact) -> Result<Vec<Contact>> {
        let _guard = self.write_guard();
        let mut recents = self.cache.recent_contacts()?;
        recents.retain(|c| c.id != contact.id);
        recents.insert(0, contact.clone());
        recents.truncate(MAX_RECENT_CONTACTS);
        self.cache.put_recent_contacts(&recents)?;
        Ok(recents)
    }

    pub(crate) fn cancel_pending(&self, contact_id: &str) {
        let handles = {
            let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.remove(contact_id)
        };
        if let Some(handles) = handles {
            for handle in &handles {
                handle.abort();
            }
            debug!(contact = %contact_id, cancelled = handles.len(), "cancelled pending chat timers");
        }
    }
}

impl Drop for ContactStore {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handles) in timers.drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

/// The directory every fresh install starts with.
fn seed_contacts() -> Vec<Contact> {
    vec![
        Contact {
            id: "campus-security".to_string(),
            name: "Campus Security".to_string(),
            category: ContactCategory::Security,
            number: "+234 803 555 0101".to_string(),
            priority: ContactPriority::VeryHigh,
            online: true,
            is_user_added: false,
        },
        Contact {
            id: "university-clinic".to_string(),
            name: "University Clinic".to_string(),
            category: ContactCategory::Health,
            number: "+234 803 555 0102".to_string(),
            priority: ContactPriority::High,
            online: true,
            is_user_added: false,
        },
        Contact {
            id: "student-affairs".to_string(),
            name: "Student Affairs Office".to_string(),
            category: ContactCategory::School,
            number: "+234 803 555 0103".to_string(),
            priority: ContactPriority::Medium,
            online: true,
            is_user_added: false,
        },
        Contact {
            id: "state-emergency".to_string(),
            name: "State Emergency Line".to_string(),
            category: ContactCategory::Government,
            number: "112".to_string(),
            priority: ContactPriority::High,
            online: true,
            is_user_added: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContactStore {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        ContactStore::new(cache)
    }

    fn user_contact(store: &ContactStore, name: &str) -> Contact {
        store
            .create_contact(NewContact {
                name: name.to_string(),
                number: "+234 800 000 0000".to_string(),
                category: ContactCategory::Other("Personal".to_string()),
                priority: ContactPriority::Medium,
            })
            .unwrap()
    }

    #[test]
    fn first_load_seeds_directory() {
        let store = store();
        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 4);
        assert!(contacts.iter().all(|c| !c.is_user_added));

        // Second load serves the persisted copy, not a fresh seed.
        let again = store.load_contacts().unwrap();
        assert_eq!(contacts, again);
    }

    #[test]
    fn create_contact_validates_required_fields() {
        let store = store();
        let err = store
            .create_contact(NewContact {
                name: "   ".to_string(),
                number: "123".to_string(),
                category: ContactCategory::Security,
                priority: ContactPriority::Low,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput(_)));

        let err = store
            .create_contact(NewContact {
                name: "Dad".to_string(),
                number: "".to_string(),
                category: ContactCategory::Other("Personal".to_string()),
                priority: ContactPriority::Low,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput(_)));
    }

    #[test]
    fn recents_are_bounded_and_ordered() {
        let store = store();
        let mut created = Vec::new();
        for i in 1..=6 {
            created.push(user_contact(&store, &format!("C{i}")));
        }

        for c in &created {
            store.add_to_recent(c).unwrap();
        }

        let recents = store.recent_contacts().unwrap();
        let names: Vec<&str> = recents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["C6", "C5", "C4", "C3", "C2"]);

        // Re-adding an existing entry moves it to the front, no duplicate.
        store.add_to_recent(&created[3]).unwrap();
        let recents = store.recent_contacts().unwrap();
        let names: Vec<&str> = recents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["C4", "C6", "C5", "C3", "C2"]);
    }

    #[tokio::test]
    async fn delete_contact_removes_every_trace() {
        let store = store();
        let contact = user_contact(&store, "Roommate");
        store.open_chat(&contact).unwrap();
        assert!(!store.cache.thread(&contact.id).unwrap().is_empty());
        assert_eq!(store.recent_contacts().unwrap().len(), 1);

        assert!(store.delete_contact(&contact.id).unwrap());

        let contacts = store.load_contacts().unwrap();
        assert!(contacts.iter().all(|c| c.id != contact.id));
        assert!(store.recent_contacts().unwrap().is_empty());
        assert!(store.cache.thread(&contact.id).unwrap().is_empty());
        assert!(store
            .cache
            .get_item(&keys::chat(&contact.id))
            .unwrap()
            .is_none());
    }

    #[test]
    fn seed_contacts_cannot_be_deleted() {
        let store = store();
        let contacts = store.load_contacts().unwrap();

        assert!(!store.delete_contact(&contacts[0].id).unwrap());
        assert_eq!(store.load_contacts().unwrap().len(), 4);
    }
}
