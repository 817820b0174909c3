/// Discord user id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// Discord guild id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuildId(pub u64);

/// Discord channel or thread id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Discord message id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

/// Discord webhook id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WebhookId(pub u64);

/// Custom emoji id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EmojiId(pub u64);

/// A stable reference to a Discord message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl UserId {
    /// Render as an inline user mention.
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl ChannelId {
    /// Render as an inline channel mention.
    pub fn mention(self) -> String {
        format!("<#{}>", self.0)
    }
}
