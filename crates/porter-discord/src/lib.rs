//! Discord adapter (serenity).
//!
//! Implements the porter-core `ChatPort`/`ProxyPort` over the Discord HTTP
//! API and maps gateway payloads into the core's platform-neutral model.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serenity::all::{
    ChannelType, Colour, CreateAttachment, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter,
    CreatePoll, CreatePollAnswer, CreateWebhook, EditWebhookMessage, ExecuteWebhook, Http,
    Message, MessageReferenceKind, MessageType, ReactionType, StickerFormatType, Timestamp,
    Webhook,
};
use serenity::cache::Cache;

pub mod commands;
pub mod controls;
pub mod events;

use porter_core::{
    domain::{ChannelId, EmojiId, GuildId, MessageId, MessageRef, UserId, WebhookId},
    message::{
        Attachment, Author, Embed, InteractionInfo, MessageKind, MessageReference, Poll,
        PollAnswer, Reaction, ReactionEmoji, SourceMessage, Sticker, StickerFormat,
    },
    messaging::{ChatPort, Destination, MessageLookup, MirrorPayload, ProxyIdentity, ProxyPort},
    Error, Result,
};

/// Port implementation over the Discord HTTP client plus the gateway cache.
pub struct DiscordGateway {
    http: Arc<Http>,
    cache: Arc<Cache>,
    rest: reqwest::Client,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self {
            http,
            cache,
            rest: reqwest::Client::new(),
        }
    }

    pub fn http(&self) -> Arc<Http> {
        self.http.clone()
    }

    fn map_err(e: serenity::Error) -> Error {
        Error::Platform(format!("discord error: {e}"))
    }

    fn status_of(e: &serenity::Error) -> Option<u16> {
        match e {
            serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)) => {
                Some(resp.status_code.as_u16())
            }
            _ => None,
        }
    }

    /// Map a Discord message into the core model.
    pub fn to_source_message(&self, msg: &Message) -> SourceMessage {
        let kind = match msg.kind {
            MessageType::Regular => MessageKind::Default,
            MessageType::InlineReply => MessageKind::Reply,
            MessageType::ChatInputCommand => MessageKind::ChatInputCommand,
            MessageType::ContextMenuCommand => MessageKind::ContextMenuCommand,
            _ => MessageKind::System,
        };

        let reference = msg.message_reference.as_ref().and_then(|r| {
            Some(MessageReference {
                kind: match r.kind {
                    MessageReferenceKind::Forward => {
                        porter_core::message::ReferenceKind::Forward
                    }
                    _ => porter_core::message::ReferenceKind::Reply,
                },
                target: MessageRef {
                    channel_id: ChannelId(r.channel_id.get()),
                    message_id: MessageId(r.message_id?.get()),
                },
            })
        });

        let reactions = msg
            .reactions
            .iter()
            .map(|r| Reaction {
                emoji: match &r.reaction_type {
                    ReactionType::Unicode(s) => ReactionEmoji::Unicode(s.clone()),
                    ReactionType::Custom { animated, id, name } => ReactionEmoji::Custom {
                        id: EmojiId(id.get()),
                        name: name.clone().unwrap_or_default(),
                        animated: *animated,
                        usable: self.emoji_guild(EmojiId(id.get())).is_some(),
                    },
                    _ => ReactionEmoji::Unicode(String::new()),
                },
                count: r.count,
            })
            .collect();

        let stickers = msg
            .sticker_items
            .iter()
            .map(|s| Sticker {
                name: s.name.clone(),
                url: s.image_url().unwrap_or_default(),
                format: match s.format_type {
                    StickerFormatType::Apng => StickerFormat::Apng,
                    StickerFormatType::Lottie => StickerFormat::Lottie,
                    StickerFormatType::Gif => StickerFormat::Gif,
                    _ => StickerFormat::Png,
                },
                description: None,
            })
            .collect();

        #[allow(deprecated)]
        let interaction = msg.interaction.as_ref().map(|i| InteractionInfo {
            user: UserId(i.user.id.get()),
            command_name: Some(i.name.clone()),
        });

        let channel_name = self
            .cache
            .channel(msg.channel_id)
            .map(|c| c.name.clone());

        SourceMessage {
            id: MessageId(msg.id.get()),
            channel_id: ChannelId(msg.channel_id.get()),
            guild_id: msg.guild_id.map(|g| GuildId(g.get())),
            channel_name,
            author: Author {
                id: UserId(msg.author.id.get()),
                display_name: msg.author.display_name().to_string(),
                avatar_url: msg.author.face(),
                bot: msg.author.bot,
            },
            kind,
            content: msg.content.clone(),
            attachments: msg
                .attachments
                .iter()
                .map(|a| Attachment {
                    filename: a.filename.clone(),
                    size: a.size as u64,
                    url: a.url.clone(),
                })
                .collect(),
            embeds: msg.embeds.iter().map(convert_embed).collect(),
            stickers,
            reactions,
            poll: msg.poll.as_ref().map(|p| convert_poll(p)),
            reference,
            interaction,
            webhook_id: msg.webhook_id.map(|w| WebhookId(w.get())),
            created_at: (*msg.timestamp).with_timezone(&Utc),
            edited_at: msg.edited_timestamp.map(|t| (*t).with_timezone(&Utc)),
        }
    }

    /// Webhooks hang off regular channels; for threads that means the
    /// parent.
    async fn webhook_channel(&self, channel: ChannelId) -> Result<serenity::all::ChannelId> {
        let id = serenity::all::ChannelId::new(channel.0);
        let channel = self.http.get_channel(id).await.map_err(Self::map_err)?;
        if let Some(guild_channel) = channel.guild() {
            if matches!(
                guild_channel.kind,
                ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
            ) {
                if let Some(parent) = guild_channel.parent_id {
                    return Ok(parent);
                }
            }
            return Ok(guild_channel.id);
        }
        Ok(id)
    }

    async fn get_webhook(&self, identity: &ProxyIdentity) -> Result<Webhook> {
        self.http
            .get_webhook(serenity::all::WebhookId::new(identity.id.0))
            .await
            .map_err(Self::map_err)
    }

    fn execute_builder(payload: &MirrorPayload, destination: &Destination) -> ExecuteWebhook {
        let mut builder = ExecuteWebhook::new()
            .content(payload.content.clone())
            .username(payload.username.clone())
            .avatar_url(payload.avatar_url.clone())
            .embeds(payload.embeds.iter().map(build_embed).collect());
        for file in &payload.files {
            builder =
                builder.add_file(CreateAttachment::bytes(file.bytes.clone(), file.filename.clone()));
        }
        if let Some(thread) = destination.thread {
            builder = builder.in_thread(serenity::all::ChannelId::new(thread.0));
        }
        if let Some(name) = &destination.thread_name {
            builder = builder.thread_name(name.clone());
        }
        if let Some(poll) = &payload.poll {
            let remaining = poll
                .expires_at
                .and_then(|t| t.signed_duration_since(Utc::now()).to_std().ok());
            // The pipeline has already dropped expired polls; a missing
            // remaining duration here means the clock moved under us.
            if let Some(remaining) = remaining {
                let answers = poll
                    .answers
                    .iter()
                    .map(|a| CreatePollAnswer::new().text(a.text.clone()))
                    .collect::<Vec<_>>();
                let mut p = CreatePoll::new()
                    .question(poll.question.clone())
                    .answers(answers)
                    .duration(remaining);
                if poll.multiselect {
                    p = p.allow_multiselect();
                }
                builder = builder.poll(p);
            }
        }
        builder
    }
}

fn convert_embed(e: &serenity::all::Embed) -> Embed {
    Embed {
        title: e.title.clone(),
        description: e.description.clone(),
        url: e.url.clone(),
        image_url: e.image.as_ref().map(|i| i.url.clone()),
        footer: e.footer.as_ref().map(|f| f.text.clone()),
        author_name: e.author.as_ref().map(|a| a.name.clone()),
        author_icon_url: e.author.as_ref().and_then(|a| a.icon_url.clone()),
        fields: e
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect(),
        timestamp: e
            .timestamp
            .as_ref()
            .map(|t| (**t).with_timezone(&Utc)),
        color: e.colour.map(|c| c.0),
    }
}

fn convert_poll(p: &serenity::all::Poll) -> Poll {
    Poll {
        question: p.question.text.clone().unwrap_or_default(),
        answers: p
            .answers
            .iter()
            .map(|a| PollAnswer {
                text: a.poll_media.text.clone().unwrap_or_default(),
                emoji: None,
            })
            .collect(),
        expires_at: p.expiry.map(|t| (*t).with_timezone(&Utc)),
        multiselect: p.allow_multiselect,
    }
}

fn build_embed(e: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();
    if let Some(title) = &e.title {
        builder = builder.title(title.clone());
    }
    if let Some(description) = &e.description {
        builder = builder.description(description.clone());
    }
    if let Some(url) = &e.url {
        builder = builder.url(url.clone());
    }
    if let Some(image) = &e.image_url {
        builder = builder.image(image.clone());
    }
    if let Some(footer) = &e.footer {
        builder = builder.footer(CreateEmbedFooter::new(footer.clone()));
    }
    if let Some(name) = &e.author_name {
        let mut author = CreateEmbedAuthor::new(name.clone());
        if let Some(icon) = &e.author_icon_url {
            author = author.icon_url(icon.clone());
        }
        builder = builder.author(author);
    }
    for (name, value) in &e.fields {
        builder = builder.field(name.clone(), value.clone(), false);
    }
    if let Some(ts) = &e.timestamp {
        builder = builder.timestamp(Timestamp::from(*ts));
    }
    if let Some(color) = e.color {
        builder = builder.color(Colour::new(color));
    }
    builder
}

#[async_trait]
impl ChatPort for DiscordGateway {
    async fn fetch_message(&self, message: MessageRef) -> Result<MessageLookup> {
        let channel = serenity::all::ChannelId::new(message.channel_id.0);
        let id = serenity::all::MessageId::new(message.message_id.0);
        match self.http.get_message(channel, id).await {
            Ok(msg) => Ok(MessageLookup::Found(Box::new(self.to_source_message(&msg)))),
            Err(e) => match Self::status_of(&e) {
                Some(404) => Ok(MessageLookup::Deleted),
                Some(403) => Ok(MessageLookup::Inaccessible),
                _ => Err(Self::map_err(e)),
            },
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.http
            .delete_message(
                serenity::all::ChannelId::new(message.channel_id.0),
                serenity::all::MessageId::new(message.message_id.0),
                None,
            )
            .await
            .map_err(Self::map_err)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .rest
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn probe_image(&self, url: &str) -> Result<bool> {
        let resp = self.rest.head(url).send().await?;
        Ok(resp.status().is_success())
    }

    fn emoji_guild(&self, emoji: EmojiId) -> Option<GuildId> {
        let id = serenity::all::EmojiId::new(emoji.0);
        for guild_id in self.cache.guilds() {
            if let Some(guild) = self.cache.guild(guild_id) {
                if guild.emojis.contains_key(&id) {
                    return Some(GuildId(guild_id.get()));
                }
            }
        }
        None
    }
}

#[async_trait]
impl ProxyPort for DiscordGateway {
    async fn list_identities(&self, channel: ChannelId) -> Result<Vec<ProxyIdentity>> {
        let webhook_channel = self.webhook_channel(channel).await?;
        let webhooks = self
            .http
            .get_channel_webhooks(webhook_channel)
            .await
            .map_err(Self::map_err)?;
        Ok(webhooks
            .into_iter()
            .map(|w| ProxyIdentity {
                id: WebhookId(w.id.get()),
                name: w.name.clone().unwrap_or_default(),
                usable: w.token.is_some(),
            })
            .collect())
    }

    async fn create_identity(&self, channel: ChannelId, name: &str) -> Result<ProxyIdentity> {
        let webhook_channel = self.webhook_channel(channel).await?;
        let webhook = webhook_channel
            .create_webhook(&self.http, CreateWebhook::new(name))
            .await
            .map_err(Self::map_err)?;
        Ok(ProxyIdentity {
            id: WebhookId(webhook.id.get()),
            name: webhook.name.clone().unwrap_or_default(),
            usable: webhook.token.is_some(),
        })
    }

    async fn delete_identity(&self, identity: WebhookId) -> Result<()> {
        self.http
            .delete_webhook(serenity::all::WebhookId::new(identity.0), None)
            .await
            .map_err(Self::map_err)
    }

    async fn send(
        &self,
        identity: &ProxyIdentity,
        destination: &Destination,
        payload: &MirrorPayload,
    ) -> Result<MessageRef> {
        let webhook = self.get_webhook(identity).await?;
        let builder = Self::execute_builder(payload, destination);
        let message = webhook
            .execute(&self.http, true, builder)
            .await
            .map_err(Self::map_err)?
            .ok_or_else(|| Error::Platform("webhook send returned no message".to_string()))?;
        Ok(MessageRef {
            channel_id: ChannelId(message.channel_id.get()),
            message_id: MessageId(message.id.get()),
        })
    }

    async fn edit(
        &self,
        identity: &ProxyIdentity,
        mirror: MessageRef,
        payload: &MirrorPayload,
    ) -> Result<()> {
        let webhook = self.get_webhook(identity).await?;
        let builder = EditWebhookMessage::new()
            .content(payload.content.clone())
            .embeds(payload.embeds.iter().map(build_embed).collect());
        webhook
            .edit_message(
                &self.http,
                serenity::all::MessageId::new(mirror.message_id.0),
                builder,
            )
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete(&self, identity: &ProxyIdentity, mirror: MessageRef) -> Result<()> {
        let webhook = self.get_webhook(identity).await?;
        webhook
            .delete_message(
                &self.http,
                None,
                serenity::all::MessageId::new(mirror.message_id.0),
            )
            .await
            .map_err(Self::map_err)
    }

    async fn fetch_own_message(
        &self,
        identity: &ProxyIdentity,
        mirror: MessageRef,
    ) -> Result<MessageLookup> {
        let webhook = self.get_webhook(identity).await?;
        match webhook
            .get_message(
                &self.http,
                None,
                serenity::all::MessageId::new(mirror.message_id.0),
            )
            .await
        {
            Ok(msg) => Ok(MessageLookup::Found(Box::new(self.to_source_message(&msg)))),
            Err(e) => match Self::status_of(&e) {
                Some(404) => Ok(MessageLookup::Deleted),
                Some(403) => Ok(MessageLookup::Inaccessible),
                _ => Err(Self::map_err(e)),
            },
        }
    }
}
