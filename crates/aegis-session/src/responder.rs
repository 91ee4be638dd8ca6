//! Rule-based responder for simulated helpline replies.
//!
//! A pure function from `(outgoing text, contact, local hour)` to a reply;
//! the chat layer feeds it the clock and schedules delivery.  Keyword rules
//! are checked in severity order: hard emergencies first, then greetings,
//! then softer canned responses, then a per-category fallback.

use aegis_shared::{Contact, ContactCategory, MessageLink};

/// Screen identifiers the UI layer routes on.
pub const REPORT_INCIDENT_SCREEN: &str = "report-incident";
pub const HELPLINES_SCREEN: &str = "helplines";

/// A synthesized reply: the message body plus optional navigation links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub links: Vec<MessageLink>,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            links: Vec::new(),
        }
    }

    fn with_link(text: impl Into<String>, link_text: &str, target_screen: &str) -> Self {
        Self {
            text: text.into(),
            links: vec![MessageLink {
                text: link_text.to_string(),
                target_screen: target_screen.to_string(),
            }],
        }
    }
}

/// Produce the simulated reply for an outgoing message.
///
/// `hour` is the local hour of day (0-23), passed in so the function stays
/// deterministic under test.
pub fn respond(text: &str, contact: &Contact, hour: u32) -> Reply {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_word = |w: &str| words.contains(&w);
    let has_any = |ws: &[&str]| ws.iter().any(|w| has_word(w));

    // Hard emergencies outrank everything, greetings included.
    if has_any(&["fire", "smoke", "burning"]) {
        return Reply::plain(
            "If you see fire or smoke, leave the building immediately, raise the alarm \
             on your way out, and keep clear of lifts. Fire responders are being notified \
             of your report.",
        );
    }

    if has_any(&["medical", "injured", "injury", "bleeding", "unconscious", "ambulance"]) {
        return Reply::with_link(
            "Stay with the injured person and do not move them unless they are in danger. \
             A medical responder is being alerted; keep your phone line free.",
            "View emergency helplines",
            HELPLINES_SCREEN,
        );
    }

    if has_any(&["theft", "stolen", "robbery", "robbed", "burglary"]) {
        return Reply::with_link(
            "Do not confront the person. Note what you can (appearance, direction, time) \
             and file an incident report so security can follow up.",
            "Report an incident",
            REPORT_INCIDENT_SCREEN,
        );
    }

    if has_any(&["harassment", "harassed", "stalking", "stalked", "assault", "threatened"]) {
        return Reply::with_link(
            "You are not alone and this will be taken seriously. Move to a public area if \
             you can, and file a report so a trained officer reaches out to you directly.",
            "Report an incident",
            REPORT_INCIDENT_SCREEN,
        );
    }

    if is_greeting(&lower, &words) {
        return greeting_reply(contact, hour);
    }

    if has_any(&["emergency", "urgent", "danger"]) || has_word("help") {
        return Reply::with_link(
            format!(
                "If this is a life-threatening emergency, call {} right now. Otherwise, \
                 describe what is happening and where you are, and we will direct the \
                 nearest responder.",
                contact.number
            ),
            "View emergency helplines",
            HELPLINES_SCREEN,
        );
    }

    if has_any(&["location", "where", "address", "directions"]) {
        return Reply::plain(
            "Share a nearby landmark, hall name, or gate number and we will route someone \
             to you. If you are unsure, stay where you are and describe what you can see.",
        );
    }

    if lower.contains("thank") {
        return Reply::plain(
            "You're welcome. Stay safe, and don't hesitate to reach out again if anything \
             changes.",
        );
    }

    if has_word("report") {
        return Reply::with_link(
            "You can file a detailed incident report from the app; it goes straight to the \
             response desk with your contact details attached.",
            "Report an incident",
            REPORT_INCIDENT_SCREEN,
        );
    }

    fallback_reply(contact)
}

fn is_greeting(lower: &str, words: &[&str]) -> bool {
    const GREETING_WORDS: [&str; 4] = ["hello", "hi", "hey", "greetings"];
    GREETING_WORDS.iter().any(|w| words.contains(w))
        || lower.contains("good morning")
        || lower.contains("good afternoon")
        || lower.contains("good evening")
}

fn salutation(hour: u32) -> &'static str {
    match hour {
        0..=11 => "Good morning",
        12..=16 => "Good afternoon",
        _ => "Good evening",
    }
}

fn greeting_reply(contact: &Contact, hour: u32) -> Reply {
    let salute = salutation(hour);
    match contact.category {
        ContactCategory::Security => Reply::with_link(
            format!(
                "{salute}! This is {}. If you are witnessing a security incident, tell us \
                 what is happening and where; you can also file a report right away.",
                contact.name
            ),
            "Report an incident",
            REPORT_INCIDENT_SCREEN,
        ),
        ContactCategory::Health => Reply::with_link(
            format!(
                "{salute}! This is {}. Describe any symptoms or injuries and we will advise \
                 you; for anything life-threatening use the emergency helplines.",
                contact.name
            ),
            "View emergency helplines",
            HELPLINES_SCREEN,
        ),
        ContactCategory::School => Reply::plain(format!(
            "{salute}! This is {}. Let us know what you need help with and we will point \
             you to the right office.",
            contact.name
        )),
        ContactCategory::Government => Reply::plain(format!(
            "{salute}! You have reached {}. State the nature of your emergency and your \
             location to be connected to the appropriate service.",
            contact.name
        )),
        ContactCategory::Other(_) => Reply::plain(format!(
            "{salute}! This is {}. How can we help you today?",
            contact.name
        )),
    }
}

fn fallback_reply(contact: &Contact) -> Reply {
    match contact.category {
        ContactCategory::Security => Reply::plain(
            "Thank you for the message. An officer will review it shortly; if the situation \
             escalates, send your location immediately.",
        ),
        ContactCategory::Health => Reply::plain(
            "Thank you for the message. A member of the clinic team will respond shortly; \
             if symptoms worsen, call the clinic line directly.",
        ),
        _ => Reply::plain(format!(
            "Thank you for reaching out to {}. Your message has been received and someone \
             will get back to you shortly.",
            contact.name
        )),
    }
}
