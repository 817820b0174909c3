use crate::domain::{ChannelId, WebhookId};
use crate::message::{Embed, FileData, Poll, SourceMessage};

/// Outcome of fetching a message through the platform.
#[derive(Clone, Debug)]
pub enum MessageLookup {
    Found(Box<SourceMessage>),
    /// The message existed but has since been deleted.
    Deleted,
    /// There is a message, but the bot cannot see the channel it lives in.
    Inaccessible,
}

/// A channel-scoped send-as-webhook credential.
///
/// `usable` is false when the credential exists but its token is not
/// available to the bot; such identities are deleted and recreated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyIdentity {
    pub id: WebhookId,
    pub name: String,
    pub usable: bool,
}

/// Where a mirror goes: a channel, optionally a thread inside it, or a new
/// thread created as part of the send (forum posts).
#[derive(Clone, Debug)]
pub struct Destination {
    pub channel: ChannelId,
    pub thread: Option<ChannelId>,
    pub thread_name: Option<String>,
}

impl Destination {
    pub fn channel(channel: ChannelId) -> Self {
        Self {
            channel,
            thread: None,
            thread_name: None,
        }
    }

    pub fn thread(channel: ChannelId, thread: ChannelId) -> Self {
        Self {
            channel,
            thread: Some(thread),
            thread_name: None,
        }
    }

    /// The id a mirror actually lands in: the thread when present.
    pub fn target_channel(&self) -> ChannelId {
        self.thread.unwrap_or(self.channel)
    }
}

/// Everything needed to (re-)send a mirror under a proxy identity.
#[derive(Clone, Debug, Default)]
pub struct MirrorPayload {
    pub content: String,
    pub files: Vec<FileData>,
    pub embeds: Vec<Embed>,
    pub poll: Option<Poll>,
    /// Display name the proxy identity impersonates.
    pub username: String,
    pub avatar_url: String,
}
