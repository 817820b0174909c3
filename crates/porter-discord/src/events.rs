//! Gateway event wiring: maps Discord events onto the core handlers.
//!
//! All association state lives behind one mutex in `AppState`, so even if
//! the gateway delivered same-message events on different worker threads,
//! propagation for them runs one at a time.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{
    Context, CreateAllowedMentions, CreateMessage, EditMessage, EventHandler, Interaction,
    Message, MessageFlags, MessageUpdateEvent, Ready,
};
use tokio::sync::Mutex;

use porter_core::{
    config::Config,
    domain::{ChannelId, MessageId, MessageRef},
    github::GithubResolver,
    hooks::{self, MessageProcessor, ProcessedMessage},
    linker::MessageLinker,
    mentions::{EntityResolver, MentionScanner},
    message::SourceMessage,
    messaging::{ChatPort, ProxyPort},
    relocation::Relocator,
    Error, Result,
};

use crate::{commands, controls, DiscordGateway};

/// Shared bot state, constructed once at startup and handed to the event
/// handler.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub gateway: Arc<DiscordGateway>,
    pub relocator: Arc<Relocator>,
    pub processor: Arc<MentionProcessor>,
    pub linker: Mutex<MessageLinker>,
}

/// Renders entity-mention summaries and owns their mirrors. The
/// `MessageProcessor` side is what the core consistency hooks drive.
pub struct MentionProcessor {
    gateway: Arc<DiscordGateway>,
    scanner: MentionScanner,
    control_timeout: Duration,
}

impl MentionProcessor {
    pub fn new(
        gateway: Arc<DiscordGateway>,
        scanner: MentionScanner,
        control_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            scanner,
            control_timeout,
        }
    }
}

#[async_trait]
impl MessageProcessor for MentionProcessor {
    async fn process(&self, msg: &SourceMessage) -> Result<ProcessedMessage> {
        let (content, count) = self.scanner.entity_message(msg).await?;
        Ok(ProcessedMessage {
            item_count: count as i64,
            content,
            files: Vec::new(),
            embeds: Vec::new(),
        })
    }

    async fn publish(
        &self,
        msg: &SourceMessage,
        output: ProcessedMessage,
    ) -> Result<Option<MessageRef>> {
        if output.item_count <= 0 {
            return Ok(None);
        }
        let http = self.gateway.http();
        let channel = serenity::all::ChannelId::new(msg.channel_id.0);
        let reference = serenity::all::MessageReference::from((
            channel,
            serenity::all::MessageId::new(msg.id.0),
        ));
        let builder = CreateMessage::new()
            .content(output.content)
            .reference_message(reference)
            .allowed_mentions(CreateAllowedMentions::new())
            .flags(MessageFlags::SUPPRESS_EMBEDS)
            .components(controls::mirror_controls(false));
        let sent = channel
            .send_message(&http, builder)
            .await
            .map_err(|e| Error::Platform(format!("mention mirror send failed: {e}")))?;

        controls::remove_controls_after_timeout(http, sent.channel_id, sent.id, self.control_timeout);
        Ok(Some(MessageRef {
            channel_id: ChannelId(sent.channel_id.get()),
            message_id: MessageId(sent.id.get()),
        }))
    }

    async fn edit_mirror(&self, mirror: MessageRef, output: &ProcessedMessage) -> Result<()> {
        let http = self.gateway.http();
        let channel = serenity::all::ChannelId::new(mirror.channel_id.0);
        let message = serenity::all::MessageId::new(mirror.message_id.0);
        let builder = EditMessage::new()
            .content(output.content.clone())
            .components(controls::mirror_controls(false));
        channel
            .edit_message(&http, message, builder)
            .await
            .map_err(|e| Error::Platform(format!("mention mirror edit failed: {e}")))?;

        controls::remove_controls_after_timeout(http, channel, message, self.control_timeout);
        Ok(())
    }

    async fn delete_mirror(&self, mirror: MessageRef) -> Result<()> {
        let http = self.gateway.http();
        serenity::all::ChannelId::new(mirror.channel_id.0)
            .delete_message(&http, serenity::all::MessageId::new(mirror.message_id.0))
            .await
            .map_err(|e| Error::Platform(format!("mention mirror delete failed: {e}")))
    }
}

pub struct Handler {
    cfg: Arc<Config>,
    state: OnceLock<Arc<AppState>>,
}

impl Handler {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            state: OnceLock::new(),
        }
    }

    /// The gateway's HTTP client and cache only exist once a `Context` does,
    /// so state is assembled on first use instead of at startup.
    fn state(&self, ctx: &Context) -> Arc<AppState> {
        self.state
            .get_or_init(|| {
                let cfg = self.cfg.clone();
                let gateway = Arc::new(DiscordGateway::new(ctx.http.clone(), ctx.cache.clone()));
                let resolver: Arc<dyn EntityResolver> =
                    Arc::new(GithubResolver::new(cfg.github_token.clone()));
                let scanner = MentionScanner::new(
                    resolver,
                    cfg.entity_ttr,
                    cfg.github_org.clone(),
                    cfg.github_repo.clone(),
                );
                let processor = Arc::new(MentionProcessor::new(
                    gateway.clone(),
                    scanner,
                    cfg.control_timeout,
                ));
                let relocator = Arc::new(Relocator::new(
                    gateway.clone() as Arc<dyn ChatPort>,
                    gateway.clone() as Arc<dyn ProxyPort>,
                    cfg.home_guild_id,
                    cfg.proxy_name.clone(),
                    cfg.image_probe_ttr,
                ));
                Arc::new(AppState {
                    cfg,
                    gateway,
                    relocator,
                    processor,
                    linker: Mutex::new(MessageLinker::new()),
                })
            })
            .clone()
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "gateway connected");
        let state = self.state(&ctx);
        if let Err(e) = commands::register(&ctx, &state).await {
            tracing::warn!(error = %e, "command registration failed");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Our own mirrors and other bots never get mirrors of their own.
        if msg.author.bot || msg.webhook_id.is_some() {
            return;
        }
        let state = self.state(&ctx);
        let source = state.gateway.to_source_message(&msg);

        let output = match state.processor.process(&source).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "mention processing failed");
                return;
            }
        };
        if output.item_count <= 0 {
            return;
        }
        match state.processor.publish(&source, output).await {
            Ok(Some(mirror)) => {
                let mut linker = state.linker.lock().await;
                linker.link(source.message_ref(), vec![mirror]);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "mention mirror send failed"),
        }
    }

    async fn message_update(
        &self,
        ctx: Context,
        old_if_available: Option<Message>,
        new: Option<Message>,
        _event: MessageUpdateEvent,
    ) {
        // Without the cached previous revision there is nothing to diff
        // against; same-message ordering is the platform's concern.
        let (Some(old), Some(new)) = (old_if_available, new) else {
            return;
        };
        if old.author.bot || old.webhook_id.is_some() {
            return;
        }
        let state = self.state(&ctx);
        let before = state.gateway.to_source_message(&old);
        let after = state.gateway.to_source_message(&new);

        let mut linker = state.linker.lock().await;
        if let Err(e) =
            hooks::on_source_edited(&mut linker, &*state.processor, &before, &after).await
        {
            tracing::warn!(error = %e, "edit propagation failed");
        }
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: serenity::all::ChannelId,
        deleted_message_id: serenity::all::MessageId,
        _guild_id: Option<serenity::all::GuildId>,
    ) {
        let gone = MessageRef {
            channel_id: ChannelId(channel_id.get()),
            message_id: MessageId(deleted_message_id.get()),
        };

        let state = self.state(&ctx);
        let mut linker = state.linker.lock().await;
        if linker.source_of(gone).is_some() {
            hooks::on_mirror_deleted(&mut linker, gone);
            return;
        }
        if let Err(e) = hooks::on_source_deleted(&mut linker, &*state.processor, gone).await {
            tracing::warn!(error = %e, "delete propagation failed");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let state = self.state(&ctx);
        match interaction {
            Interaction::Command(command) => {
                commands::handle_command(&ctx, &command, &state).await;
            }
            Interaction::Component(component) => {
                if component
                    .data
                    .custom_id
                    .starts_with(commands::MOVE_SELECT_PREFIX)
                {
                    commands::handle_move_select(&ctx, &component, &state).await;
                } else {
                    controls::handle_control(&ctx, &component, &state).await;
                }
            }
            _ => {}
        }
    }
}
