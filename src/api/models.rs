//! Wire models for the remote API.
//!
//! Only the fields the sweeper reads are modelled; everything else in the
//! payloads is ignored.

use serde::{Deserialize, Serialize};

const CDN_BASE: &str = "https://cdn.discordapp.com";

/// An account as returned by identity lookup or embedded in messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl User {
    /// Small avatar URL, animated when the hash says so.
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar
            .as_deref()
            .map(|hash| cdn_image_url("avatars", &self.id, hash))
    }
}

/// A community (server) the user is a member of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Community {
    pub fn icon_url(&self) -> Option<String> {
        self.icon
            .as_deref()
            .map(|hash| cdn_image_url("icons", &self.id, hash))
    }
}

/// A direct or group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipients: Option<Vec<User>>,
}

impl Conversation {
    /// Recipient usernames joined by ", ", or `DM <id>` without recipients.
    pub fn display_name(&self) -> String {
        match &self.recipients {
            Some(recipients) => recipients
                .iter()
                .map(|r| r.username.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            None => format!("DM {}", self.id),
        }
    }

    /// Avatar of the first recipient.
    pub fn display_icon(&self) -> Option<String> {
        self.recipients
            .as_ref()
            .and_then(|r| r.first())
            .and_then(User::avatar_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

/// One page of search results.
///
/// Each hit is delivered as a group of messages (the hit plus context);
/// [`SearchPage::flatten`] yields them in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub total_results: u64,
    #[serde(default)]
    pub messages: Vec<Vec<Message>>,
}

impl SearchPage {
    pub fn flatten(self) -> impl Iterator<Item = Message> {
        self.messages.into_iter().flatten()
    }
}

fn cdn_image_url(kind: &str, owner_id: &str, hash: &str) -> String {
    let ext = if hash.starts_with("a_") { "gif" } else { "webp" };
    format!("{CDN_BASE}/{kind}/{owner_id}/{hash}.{ext}?size=32")
}
