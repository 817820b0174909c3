//! The content relocation pipeline: everything between "a moderator picked a
//! destination" and "the mirror exists and the source is gone".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::cache::{Fetch, TtrCache};
use crate::domain::{GuildId, MessageRef, UserId};
use crate::markup::{convert_custom_emojis, truncate};
use crate::message::{
    can_be_relocated, Attachment, Embed, FileData, MessageKind, Poll, SourceMessage, Sticker,
    StickerFormat, MAX_ATTACHMENT_SIZE,
};
use crate::messaging::{ChatPort, Destination, MessageLookup, MirrorPayload, ProxyPort};
use crate::proxy::{find_mirror, get_or_create_identity, MirrorLookup};
use crate::subtext::{CarriedSubtext, PollStatus, Subtext};
use crate::{Error, Result};

/// Platform ceiling on message text length, in characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Embed descriptions cap out at 4096 characters.
const MAX_EMBED_DESCRIPTION: usize = 4096;

const COLOR_RED: u32 = 0xED4245;
const COLOR_ORANGE: u32 = 0xE67E22;

/// Where a resolved reference ended up.
#[derive(Clone, Debug)]
pub enum ResolvedReference {
    None,
    Resolved(Box<SourceMessage>),
    /// The referenced message has been deleted since.
    Deleted,
    /// There is a reference, but the bot cannot reach it.
    Inaccessible,
}

fn unattachable_embed(element: &str, title: Option<String>, description: Option<String>) -> Embed {
    Embed {
        title,
        description,
        footer: Some(format!("Unable to attach {element}.")),
        color: Some(COLOR_RED),
        ..Embed::default()
    }
}

struct ImageProbe;

#[async_trait]
impl Fetch<String, bool, Arc<dyn ChatPort>> for ImageProbe {
    async fn fetch(&self, url: &String, chat: &Arc<dyn ChatPort>) -> Result<Option<bool>> {
        Ok(Some(chat.probe_image(url).await?))
    }
}

/// CDN host variants to try for a sticker image: the platform inconsistently
/// serves one host or the other.
fn sticker_url_variants(url: &str) -> Vec<String> {
    vec![
        url.to_string(),
        url.replace("cdn.discordapp.com", "media.discordapp.net"),
        url.replace("media.discordapp.net", "cdn.discordapp.com"),
    ]
}

/// Render `message` through `template`, falling back to a file attachment
/// when the transformed result would blow the platform's length ceiling. The
/// fallback keeps only the template's frame (the subtext) inline and ships
/// the raw body as `content.md`.
pub fn format_or_file<T, X>(message: &str, template: T, transform: X) -> (String, Option<FileData>)
where
    T: Fn(&str) -> String,
    X: Fn(&str) -> String,
{
    let full = transform(&template(message));
    if full.chars().count() > MAX_MESSAGE_LEN {
        return (
            template(""),
            Some(FileData {
                filename: "content.md".to_string(),
                bytes: message.as_bytes().to_vec(),
            }),
        );
    }
    (full, None)
}

pub struct Relocator {
    chat: Arc<dyn ChatPort>,
    proxy: Arc<dyn ProxyPort>,
    home_guild: GuildId,
    proxy_name: String,
    probe_cache: TtrCache<String, bool>,
}

impl Relocator {
    pub fn new(
        chat: Arc<dyn ChatPort>,
        proxy: Arc<dyn ProxyPort>,
        home_guild: GuildId,
        proxy_name: String,
        probe_ttr: Duration,
    ) -> Self {
        Self {
            chat,
            proxy,
            home_guild,
            proxy_name,
            probe_cache: TtrCache::new(probe_ttr),
        }
    }

    pub fn proxy_name(&self) -> &str {
        &self.proxy_name
    }

    /// Relocate `msg` to `destination` under the proxy identity.
    ///
    /// All-or-nothing from the user's point of view: the source message is
    /// deleted only after the platform has acknowledged the mirror, and a
    /// failed send leaves the source untouched. `executor` is the acting
    /// moderator, absent for automated relocations; `include_move_marks`
    /// controls whether attribution and move provenance are rendered.
    pub async fn move_message(
        &self,
        msg: &SourceMessage,
        executor: Option<UserId>,
        destination: &Destination,
        include_move_marks: bool,
    ) -> Result<MessageRef> {
        if !can_be_relocated(msg.kind) {
            return Err(Error::Ineligible(msg.kind));
        }

        let (mut files, skipped) = self.scrape_files(&msg.attachments).await?;

        // Embeds with a URL are link previews; the platform regenerates
        // those on its own.
        let mut embeds: Vec<Embed> =
            msg.embeds.iter().filter(|e| e.url.is_none()).cloned().collect();
        for sticker in &msg.stickers {
            embeds.push(self.sticker_embed(sticker).await?);
        }

        match msg.reference.map(|r| r.kind) {
            Some(crate::message::ReferenceKind::Forward) => {
                let (forward_embeds, forward_files) = match self.resolve_reference(msg).await? {
                    ResolvedReference::Resolved(forward) => self.forward_embeds(&forward).await?,
                    ResolvedReference::Deleted => (
                        vec![Embed {
                            description: Some("*Forwarded message was deleted.*".to_string()),
                            author_name: Some("➜ Forwarded".to_string()),
                            ..Embed::default()
                        }],
                        Vec::new(),
                    ),
                    _ => (vec![unattachable_embed("forward", None, None)], Vec::new()),
                };
                embeds = forward_embeds.into_iter().chain(embeds).collect();
                files.extend(forward_files);
            }
            Some(crate::message::ReferenceKind::Reply) => {
                if let Some(embed) = self.reply_embed(msg).await? {
                    embeds.push(embed);
                }
            }
            None => {}
        }

        let now = Utc::now();
        let (poll, poll_status) = match &msg.poll {
            None => (None, PollStatus::Absent),
            // A poll sent under the proxy identity cannot be ended by a
            // human, so one that has already ended is dropped, not recreated.
            Some(p) if p.is_expired(now) => (None, PollStatus::Dropped),
            Some(p) => (Some(p.clone()), PollStatus::Carried),
        };

        // A mirror being moved again keeps its subtext, extended with the
        // new origin, instead of being re-encoded with the proxy as author.
        let mut carried: Option<CarriedSubtext> = None;
        if include_move_marks {
            if let MirrorLookup::Found(mirror) =
                find_mirror(&*self.proxy, msg, &self.proxy_name).await?
            {
                let mut split = CarriedSubtext::split(&mirror.message.content);
                split.update(msg, executor);
                carried = Some(split);
            }
        }
        let (body, subtext) = match &carried {
            Some(split) => (split.content.clone(), split.subtext()),
            None => {
                let s = Subtext::new(msg, executor, skipped, poll_status);
                let rendered = if include_move_marks {
                    s.format()
                } else {
                    s.format_simple()
                };
                (msg.interaction_content(), rendered)
            }
        };

        let (mut content, overflow) = format_or_file(
            &body,
            |b| format!("{b}\n{subtext}"),
            |s| self.portable_emojis(s, false),
        );
        if let Some(file) = overflow {
            files.push(file);
            content = annotate_content_attached(&content);
        }

        let identity =
            get_or_create_identity(&*self.proxy, destination.channel, &self.proxy_name).await?;
        let payload = MirrorPayload {
            content,
            files,
            embeds,
            poll,
            username: msg.author.display_name.clone(),
            avatar_url: msg.author.avatar_url.clone(),
        };

        let mirror = self
            .proxy
            .send(&identity, destination, &payload)
            .await
            .map_err(|e| Error::ProxySend(e.to_string()))?;

        // Only now is the relocation irreversible.
        self.chat.delete_message(msg.message_ref()).await?;
        tracing::info!(
            source = msg.id.0,
            mirror = mirror.message_id.0,
            channel = destination.target_channel().0,
            "message relocated"
        );
        Ok(mirror)
    }

    /// Resolve the message referenced by `msg`, collapsing chains of
    /// forwards-of-forwards into the single deepest original. The chain ends
    /// at the first non-forward reference: a reply that is itself forwarded
    /// is not chased further, since that would walk the whole reply chain.
    pub async fn resolve_reference(&self, msg: &SourceMessage) -> Result<ResolvedReference> {
        let Some(reference) = msg.reference else {
            return Ok(ResolvedReference::None);
        };

        let mut current = match self.chat.fetch_message(reference.target).await? {
            MessageLookup::Found(m) => m,
            MessageLookup::Deleted => return Ok(ResolvedReference::Deleted),
            MessageLookup::Inaccessible => return Ok(ResolvedReference::Inaccessible),
        };

        if reference.kind != crate::message::ReferenceKind::Forward {
            return Ok(ResolvedReference::Resolved(current));
        }

        loop {
            let Some(next) = current.reference else {
                return Ok(ResolvedReference::Resolved(current));
            };
            if next.kind != crate::message::ReferenceKind::Forward {
                // The deepest forward target is itself a reply; keep it.
                return Ok(ResolvedReference::Resolved(current));
            }
            current = match self.chat.fetch_message(next.target).await? {
                MessageLookup::Found(m) => m,
                MessageLookup::Deleted => return Ok(ResolvedReference::Deleted),
                MessageLookup::Inaccessible => return Ok(ResolvedReference::Inaccessible),
            };
        }
    }

    /// Re-download attachments up to the size ceiling; larger ones are
    /// counted, not fetched.
    async fn scrape_files(&self, attachments: &[Attachment]) -> Result<(Vec<FileData>, usize)> {
        let mut files = Vec::new();
        let mut skipped = 0usize;
        for attachment in attachments {
            if attachment.size > MAX_ATTACHMENT_SIZE {
                skipped += 1;
                continue;
            }
            let bytes = self.chat.download(&attachment.url).await?;
            files.push(FileData {
                filename: attachment.filename.clone(),
                bytes,
            });
        }
        Ok((files, skipped))
    }

    fn portable_emojis(&self, content: &str, force: bool) -> String {
        convert_custom_emojis(content, self.home_guild, force, |id| {
            self.chat.emoji_guild(id)
        })
    }

    async fn sticker_embed(&self, sticker: &Sticker) -> Result<Embed> {
        if sticker.format == StickerFormat::Lottie {
            // Vector animations cannot be shown in an embed at all.
            return Ok(unattachable_embed(
                "sticker",
                Some(sticker.name.clone()),
                sticker.description.clone(),
            ));
        }

        for url in sticker_url_variants(&sticker.url) {
            let reachable = self
                .probe_cache
                .get(url.clone(), &self.chat, &ImageProbe)
                .await?
                .unwrap_or(false);
            if !reachable {
                continue;
            }

            let mut embed = Embed {
                title: Some(sticker.name.clone()),
                image_url: Some(url),
                footer: sticker.description.clone(),
                ..Embed::default()
            };
            if sticker.format == StickerFormat::Apng {
                // Only a static frame of it can be shown.
                embed.footer = Some(match &sticker.description {
                    Some(d) if !d.is_empty() => format!("Unable to animate sticker • {d}"),
                    _ => "Unable to animate sticker.".to_string(),
                });
                embed.color = Some(COLOR_ORANGE);
            }
            return Ok(embed);
        }

        Ok(unattachable_embed(
            "sticker",
            Some(sticker.name.clone()),
            sticker.description.clone(),
        ))
    }

    /// The quoted-reply embed appended to mirrors of replies and
    /// context-menu command responses.
    async fn reply_embed(&self, msg: &SourceMessage) -> Result<Option<Embed>> {
        let reply = match self.resolve_reference(msg).await? {
            ResolvedReference::None => return Ok(None),
            ResolvedReference::Resolved(reply) => reply,
            ResolvedReference::Deleted => {
                let author_name = if msg.kind == MessageKind::ContextMenuCommand {
                    "⚡ Message"
                } else {
                    "↪️ Reply"
                };
                return Ok(Some(Embed {
                    description: Some("*Original message was deleted.*".to_string()),
                    author_name: Some(author_name.to_string()),
                    ..Embed::default()
                }));
            }
            ResolvedReference::Inaccessible => {
                return Ok(Some(unattachable_embed("reply", None, None)))
            }
        };

        let mut description = reply.content.clone();
        let mut prefix = "";
        if reply.reference.map(|r| r.kind) == Some(crate::message::ReferenceKind::Forward) {
            prefix = "➜ Forwarded\n";
            description = if reply.content.is_empty() {
                "> *Some forwarded content elided.*".to_string()
            } else {
                format!("> {}", reply.content)
            };
        }

        let author_name = if msg.kind == MessageKind::ContextMenuCommand {
            format!("⚡ Acting on {}'s message", reply.author.display_name)
        } else {
            format!("↪️ Replying to {}", reply.author.display_name)
        };

        Ok(Some(Embed {
            description: Some(format!("{prefix}{}", truncate(&description, 100))),
            author_name: Some(author_name),
            author_icon_url: Some(reply.author.avatar_url.clone()),
            fields: vec![(
                String::new(),
                format!("-# [**Jump**](<{}>) 📎", reply.jump_url()),
            )],
            ..Embed::default()
        }))
    }

    /// Embeds and files representing a forwarded message: the forward frame
    /// first, then whatever the forward itself carried.
    async fn forward_embeds(
        &self,
        forward: &SourceMessage,
    ) -> Result<(Vec<Embed>, Vec<FileData>)> {
        let mut content = self.portable_emojis(&forward.content, false);
        if content.chars().count() > MAX_EMBED_DESCRIPTION {
            content = forward.content.clone();
        }

        let (files, skipped) = self.scrape_files(&forward.attachments).await?;
        let mut embeds: Vec<Embed> = forward
            .embeds
            .iter()
            .filter(|e| e.url.is_none())
            .cloned()
            .collect();
        for sticker in &forward.stickers {
            embeds.push(self.sticker_embed(sticker).await?);
        }

        let mut frame = Embed {
            description: Some(content),
            author_name: Some("➜ Forwarded".to_string()),
            timestamp: Some(forward.created_at),
            footer: forward.channel_name.as_ref().map(|n| format!("#{n}")),
            ..Embed::default()
        };

        // A lone image gets promoted into the frame itself.
        let images: Vec<&FileData> = files.iter().filter(|f| f.is_image()).collect();
        let image_only: Vec<usize> = embeds
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.image_url.is_some()
                    && e.title.is_none()
                    && e.description.is_none()
                    && e.fields.is_empty()
            })
            .map(|(i, _)| i)
            .collect();
        let mut promoted_image = false;
        if images.len() == 1 {
            frame.image_url = Some(format!("attachment://{}", images[0].filename));
            promoted_image = true;
        } else if image_only.len() == 1 {
            let absorbed = embeds.remove(image_only[0]);
            frame.image_url = absorbed.image_url;
        }

        if !embeds.is_empty() || files.len() > usize::from(promoted_image) {
            frame.fields.push((
                String::new(),
                "-# (other forwarded content is attached)".to_string(),
            ));
        }
        if skipped > 0 {
            frame.fields.push((
                String::new(),
                format!("-# {}", crate::subtext::format_skipped(skipped)),
            ));
        }
        frame.fields.push((
            String::new(),
            format!("-# [**Jump**](<{}>) 📎", forward.jump_url()),
        ));

        embeds.insert(0, frame);
        Ok((embeds, files))
    }
}

/// Mark a fallback payload as having its body shipped as a file, keeping the
/// move mark last so re-moves still append to it correctly.
fn annotate_content_attached(content: &str) -> String {
    if content.trim().is_empty() {
        return "-# Content attached".to_string();
    }
    if let Some(pos) = content.rfind(" • ") {
        let (head, tail) = content.split_at(pos);
        let move_mark = &tail[" • ".len()..];
        return format!("{head} • Content attached • {move_mark}");
    }
    format!("{content} • Content attached")
}
