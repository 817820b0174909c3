use chrono::{DateTime, Utc};

use crate::domain::{ChannelId, EmojiId, GuildId, MessageId, MessageRef, UserId, WebhookId};

/// Per-file ceiling for re-uploaded attachments. Anything larger is counted
/// as skipped and surfaced through the subtext instead of erroring.
pub const MAX_ATTACHMENT_SIZE: u64 = 67_108_864; // 64 MiB

/// Image formats Discord can render inside an embed, as file extensions
/// (including the leading dot).
pub const SUPPORTED_IMAGE_FORMATS: [&str; 6] =
    [".avif", ".gif", ".jpeg", ".jpg", ".png", ".webp"];

/// Message kinds as reported by the platform. Only the non-system kinds
/// (plus the two command-invocation kinds) are eligible for relocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Default,
    Reply,
    ChatInputCommand,
    ContextMenuCommand,
    /// Everything else: boosts, pins, thread markers, member joins, ...
    System,
}

/// Whether a message may go through the relocation pipeline.
pub fn can_be_relocated(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::Default
            | MessageKind::Reply
            | MessageKind::ChatInputCommand
            | MessageKind::ContextMenuCommand
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: String,
    pub bot: bool,
}

/// An attachment as it hangs off a platform message (not yet downloaded).
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub size: u64,
    pub url: String,
}

/// An attachment re-downloaded for re-upload under the proxy identity.
#[derive(Clone, Debug, PartialEq)]
pub struct FileData {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl FileData {
    /// File extension including the leading dot, lowercased.
    pub fn extension(&self) -> Option<String> {
        let idx = self.filename.rfind('.')?;
        Some(self.filename[idx..].to_ascii_lowercase())
    }

    pub fn is_image(&self) -> bool {
        self.extension()
            .map(|ext| SUPPORTED_IMAGE_FORMATS.contains(&ext.as_str()))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReactionEmoji {
    /// A plain unicode emoji.
    Unicode(String),
    /// A guild custom emoji. `usable` is whether the bot itself can render
    /// it; unusable ones degrade to a named link in the subtext.
    Custom {
        id: EmojiId,
        name: String,
        animated: bool,
        usable: bool,
    },
}

impl ReactionEmoji {
    /// CDN image URL for a custom emoji.
    pub fn url(&self) -> Option<String> {
        match self {
            ReactionEmoji::Unicode(_) => None,
            ReactionEmoji::Custom { id, animated, .. } => {
                let ext = if *animated { "gif" } else { "webp" };
                Some(format!("https://cdn.discordapp.com/emojis/{}.{ext}", id.0))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reaction {
    pub emoji: ReactionEmoji,
    pub count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StickerFormat {
    Png,
    Apng,
    /// Vector animation; cannot be shown in an embed at all.
    Lottie,
    Gif,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sticker {
    pub name: String,
    pub url: String,
    pub format: StickerFormat,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollAnswer {
    pub text: String,
    pub emoji: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Poll {
    pub question: String,
    pub answers: Vec<PollAnswer>,
    pub expires_at: Option<DateTime<Utc>>,
    pub multiselect: bool,
}

impl Poll {
    /// A poll recreated under a proxy identity cannot be ended by a human,
    /// so an already-ended poll must be dropped rather than carried over.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(t) => now >= t,
            None => true,
        }
    }
}

/// A rendered embed. Plain data; the adapter maps it onto the platform's
/// builder types.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub footer: Option<String>,
    pub author_name: Option<String>,
    pub author_icon_url: Option<String>,
    pub fields: Vec<(String, String)>,
    pub timestamp: Option<DateTime<Utc>>,
    pub color: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    Reply,
    Forward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageReference {
    pub kind: ReferenceKind,
    pub target: MessageRef,
}

/// The slash/context command invocation behind a command-response message.
#[derive(Clone, Debug, PartialEq)]
pub struct InteractionInfo {
    pub user: UserId,
    pub command_name: Option<String>,
}

/// A platform message as the core sees it. Owned by the chat platform; the
/// bot only ever holds transient snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub channel_name: Option<String>,
    pub author: Author,
    pub kind: MessageKind,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub stickers: Vec<Sticker>,
    pub reactions: Vec<Reaction>,
    pub poll: Option<Poll>,
    pub reference: Option<MessageReference>,
    pub interaction: Option<InteractionInfo>,
    /// Set when the message was sent through a webhook; such messages are
    /// candidates for being mirrors of ours.
    pub webhook_id: Option<WebhookId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl SourceMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.id,
        }
    }

    pub fn jump_url(&self) -> String {
        match self.guild_id {
            Some(g) => format!(
                "https://discord.com/channels/{}/{}/{}",
                g.0, self.channel_id.0, self.id.0
            ),
            None => format!(
                "https://discord.com/channels/@me/{}/{}",
                self.channel_id.0, self.id.0
            ),
        }
    }

    /// Visible text with the command-invocation note prepended when the
    /// message is a command response.
    pub fn interaction_content(&self) -> String {
        let Some(info) = &self.interaction else {
            return self.content.clone();
        };
        let name = match &info.command_name {
            Some(name) if self.kind == MessageKind::ContextMenuCommand => format!("`{name}`"),
            Some(name) => format!("`/{name}`"),
            None => "a command".to_string(),
        };
        format!("-# *{} used {name}*\n{}", info.user.mention(), self.content)
    }
}
