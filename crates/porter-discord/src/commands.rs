//! The "Move message" context-menu entry point and its channel-select
//! follow-up. Registration is kept thin; everything interesting happens in
//! the core relocation pipeline.

use serenity::all::{
    ChannelType, CommandInteraction, ComponentInteraction, ComponentInteractionDataKind, Context,
    CreateActionRow, CreateCommand, CreateInteractionResponse, CreateInteractionResponseMessage,
    CreateSelectMenu, CreateSelectMenuKind, EditInteractionResponse, Permissions,
};

use porter_core::{
    domain::{ChannelId, MessageId, MessageRef, UserId},
    message::can_be_relocated,
    messaging::{ChatPort, Destination, MessageLookup},
};

use crate::events::AppState;

pub const MOVE_COMMAND: &str = "Move message";
pub const MOVE_SELECT_PREFIX: &str = "porter:move:";

pub async fn register(ctx: &Context, state: &AppState) -> anyhow::Result<()> {
    let guild = serenity::all::GuildId::new(state.cfg.home_guild_id.0);
    guild
        .set_commands(
            &ctx.http,
            vec![CreateCommand::new(MOVE_COMMAND)
                .kind(serenity::all::CommandType::Message)
                .default_member_permissions(Permissions::MANAGE_MESSAGES)],
        )
        .await?;
    Ok(())
}

fn is_privileged(command: &CommandInteraction, state: &AppState) -> bool {
    let Some(member) = &command.member else {
        return false;
    };
    let allowed = [state.cfg.mod_role_id, state.cfg.helper_role_id];
    member.roles.iter().any(|role| {
        allowed
            .iter()
            .flatten()
            .any(|allowed| role.get() == *allowed)
    })
}

async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, text: &str) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(text.to_string())
            .ephemeral(true),
    );
    if let Err(e) = command.create_response(&ctx.http, response).await {
        tracing::warn!(error = %e, "failed to answer command");
    }
}

pub async fn handle_command(ctx: &Context, command: &CommandInteraction, state: &AppState) {
    if command.data.name != MOVE_COMMAND {
        return;
    }
    if !is_privileged(command, state) {
        respond_ephemeral(ctx, command, "You do not have permission to move messages.").await;
        return;
    }

    let Some(target) = command.data.resolved.messages.values().next() else {
        respond_ephemeral(ctx, command, "No message selected.").await;
        return;
    };
    let source = state.gateway.to_source_message(target);
    if !can_be_relocated(source.kind) {
        respond_ephemeral(ctx, command, "That message cannot be moved.").await;
        return;
    }

    let custom_id = format!(
        "{MOVE_SELECT_PREFIX}{}:{}",
        source.channel_id.0, source.id.0
    );
    let menu = CreateSelectMenu::new(
        custom_id,
        CreateSelectMenuKind::Channel {
            channel_types: Some(vec![ChannelType::Text, ChannelType::PublicThread]),
            default_channels: None,
        },
    )
    .placeholder("Select a channel");

    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content("Select a channel to move this message to.")
            .components(vec![CreateActionRow::SelectMenu(menu)])
            .ephemeral(true),
    );
    if let Err(e) = command.create_response(&ctx.http, response).await {
        tracing::warn!(error = %e, "failed to open channel select");
    }
}

fn parse_move_custom_id(custom_id: &str) -> Option<MessageRef> {
    let rest = custom_id.strip_prefix(MOVE_SELECT_PREFIX)?;
    let (channel, message) = rest.split_once(':')?;
    Some(MessageRef {
        channel_id: ChannelId(channel.parse().ok()?),
        message_id: MessageId(message.parse().ok()?),
    })
}

pub async fn handle_move_select(ctx: &Context, component: &ComponentInteraction, state: &AppState) {
    let Some(source_ref) = parse_move_custom_id(&component.data.custom_id) else {
        return;
    };
    let ComponentInteractionDataKind::ChannelSelect { values } = &component.data.kind else {
        return;
    };
    let Some(selected) = values.first().copied() else {
        return;
    };

    if selected.get() == source_ref.channel_id.0 {
        let update = CreateInteractionResponse::UpdateMessage(
            CreateInteractionResponseMessage::new().content(
                "You can't move a message to the same channel. Pick a different channel.",
            ),
        );
        let _ = component.create_response(&ctx.http, update).await;
        return;
    }

    // The move involves several round trips; acknowledge now, report later.
    let _ = component
        .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
        .await;

    let report = move_to(ctx, component, state, source_ref, selected).await;
    let text = match report {
        Ok(dest) => format!("Moved the message to <#{}>.", dest.0),
        Err(e) => {
            tracing::warn!(error = %e, "move failed");
            format!("Failed to move the message: {e}")
        }
    };
    if let Err(e) = component
        .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
        .await
    {
        tracing::warn!(error = %e, "failed to report move result");
    }
}

async fn move_to(
    ctx: &Context,
    component: &ComponentInteraction,
    state: &AppState,
    source_ref: MessageRef,
    selected: serenity::all::ChannelId,
) -> porter_core::Result<ChannelId> {
    let source = match state.gateway.fetch_message(source_ref).await? {
        MessageLookup::Found(msg) => *msg,
        _ => {
            return Err(porter_core::Error::Platform(
                "the message is no longer there".to_string(),
            ))
        }
    };

    let destination = destination_for(ctx, selected).await?;
    let executor = UserId(component.user.id.get());
    state
        .relocator
        .move_message(&source, Some(executor), &destination, true)
        .await?;
    Ok(destination.target_channel())
}

async fn destination_for(
    ctx: &Context,
    selected: serenity::all::ChannelId,
) -> porter_core::Result<Destination> {
    let channel = selected
        .to_channel(&ctx.http)
        .await
        .map_err(|e| porter_core::Error::Platform(format!("cannot resolve channel: {e}")))?;
    let Some(guild_channel) = channel.guild() else {
        return Err(porter_core::Error::Platform(
            "destination must be a guild channel".to_string(),
        ));
    };

    if matches!(
        guild_channel.kind,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
    ) {
        let parent = guild_channel.parent_id.ok_or_else(|| {
            porter_core::Error::Platform("thread has no parent channel".to_string())
        })?;
        return Ok(Destination::thread(
            ChannelId(parent.get()),
            ChannelId(guild_channel.id.get()),
        ));
    }
    Ok(Destination::channel(ChannelId(guild_channel.id.get())))
}
