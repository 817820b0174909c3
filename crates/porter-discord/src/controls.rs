//! Interactive controls attached to mirrors: ❌ Delete and ❄ Freeze. Only
//! the source author (or a moderator) may use them, and they are stripped
//! from the mirror after a timeout.

use std::sync::Arc;
use std::time::Duration;

use serenity::all::{
    ButtonStyle, ComponentInteraction, Context, CreateActionRow, CreateButton,
    CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
    EditMessage, Http,
};

use porter_core::{
    domain::{ChannelId, MessageId, MessageRef},
    hooks,
    messaging::{ChatPort, MessageLookup},
};

use crate::events::AppState;

pub const DELETE_ID: &str = "porter:delete";
pub const FREEZE_ID: &str = "porter:freeze";

pub fn mirror_controls(frozen: bool) -> Vec<CreateActionRow> {
    vec![CreateActionRow::Buttons(vec![
        CreateButton::new(DELETE_ID)
            .label("Delete")
            .emoji('❌')
            .style(ButtonStyle::Secondary),
        CreateButton::new(FREEZE_ID)
            .label("Freeze")
            .emoji('❄')
            .style(ButtonStyle::Secondary)
            .disabled(frozen),
    ])]
}

/// Best-effort, fire-and-forget removal of a mirror's controls once the
/// window for using them has passed. Independent of the operation that
/// attached them.
pub fn remove_controls_after_timeout(
    http: Arc<Http>,
    channel: serenity::all::ChannelId,
    message: serenity::all::MessageId,
    timeout: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let builder = EditMessage::new().components(Vec::new());
        if let Err(e) = channel.edit_message(&http, message, builder).await {
            tracing::debug!(error = %e, "control removal failed");
        }
    });
}

async fn ephemeral(ctx: &Context, interaction: &ComponentInteraction, text: &str) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(text.to_string())
            .ephemeral(true),
    );
    if let Err(e) = interaction.create_response(&ctx.http, response).await {
        tracing::warn!(error = %e, "failed to answer control interaction");
    }
}

fn is_moderator(interaction: &ComponentInteraction, state: &AppState) -> bool {
    let Some(member) = &interaction.member else {
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

/// Handle a ❌/❄ button press on a mirror.
pub async fn handle_control(ctx: &Context, interaction: &ComponentInteraction, state: &AppState) {
    let mirror = MessageRef {
        channel_id: ChannelId(interaction.message.channel_id.get()),
        message_id: MessageId(interaction.message.id.get()),
    };

    let source = {
        let linker = state.linker.lock().await;
        linker.source_of(mirror)
    };
    let Some(source) = source else {
        ephemeral(ctx, interaction, "This control has expired.").await;
        return;
    };

    // Only the person whose message triggered the mirror (or a moderator)
    // may operate on it.
    let permitted = is_moderator(interaction, state)
        || match state.gateway.fetch_message(source).await {
            Ok(MessageLookup::Found(src)) => src.author.id.0 == interaction.user.id.get(),
            _ => false,
        };
    if !permitted {
        ephemeral(
            ctx,
            interaction,
            "Only the person who triggered this message can use its controls.",
        )
        .await;
        return;
    }

    match interaction.data.custom_id.as_str() {
        DELETE_ID => {
            {
                let mut linker = state.linker.lock().await;
                hooks::on_mirror_deleted(&mut linker, mirror);
            }
            if let Err(e) = interaction.message.delete(&ctx.http).await {
                tracing::warn!(error = %e, "failed to delete mirror via control");
            }
            let _ = interaction
                .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
                .await;
        }
        FREEZE_ID => {
            {
                let mut linker = state.linker.lock().await;
                linker.freeze(source);
            }
            let update = CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new().components(mirror_controls(true)),
            );
            if let Err(e) = interaction.create_response(&ctx.http, update).await {
                tracing::warn!(error = %e, "failed to disable freeze control");
            }
            let _ = interaction
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new()
                        .content(
                            "Message frozen. I will no longer react to what happens \
                             to your original message.",
                        )
                        .ephemeral(true),
                )
                .await;
        }
        other => {
            tracing::debug!(custom_id = other, "unknown control id");
        }
    }
}
