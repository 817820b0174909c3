//! The subtext block: trailing caption lines appended to a mirror's text
//! that encode provenance (author, timestamps, reactions, move origin,
//! skipped attachments, poll notices) in plain text, plus the heuristic
//! decoder that recovers the original author from it.
//!
//! The decoder is the only provenance store that survives a restart, so the
//! line grammar must stay stable. Grammar change-log:
//!   v1: reactions line; context line of " • "-joined fields in the order
//!       authored-by/timestamp, move origin, skipped count, poll notice.
//! When changing the grammar in ways that are not backward-compatible, bump
//! `linker::EDGE_EXPIRY` too: it is the only window in which mirrors with
//! the old format are still acted upon.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::domain::UserId;
use crate::message::{Reaction, ReactionEmoji, SourceMessage};

/// Prefix Discord renders as small caption text.
pub const CAPTION_PREFIX: &str = "-# ";

/// Messages younger than this get no timestamp field; the platform's own
/// recency display already covers them.
pub const TIMESTAMP_GRACE_HOURS: i64 = 12;

fn snowflake_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(\D{0,2})(\d+)>").expect("snowflake regex"))
}

fn reaction_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^\s×]+) ×(\d+)$").expect("reaction regex"))
}

/// Render a platform-native dynamic timestamp token.
pub fn dynamic_timestamp(t: DateTime<Utc>, style: Option<char>) -> String {
    match style {
        Some(s) => format!("<t:{}:{s}>", t.timestamp()),
        None => format!("<t:{}>", t.timestamp()),
    }
}

/// Find the first mention-shaped token and return its id and byte offset,
/// provided its sigil matches `sigil` exactly.
///
/// WARNING: this does not account for Markdown features such as code blocks
/// that may disarm a mention; that is an accepted limitation of the codec.
pub fn find_snowflake(content: &str, sigil: &str) -> Option<(u64, usize)> {
    let caps = snowflake_regex().captures(content)?;
    if &caps[1] != sigil {
        return None;
    }
    let id = caps[2].parse::<u64>().ok()?;
    Some((id, caps.get(0).map(|m| m.start()).unwrap_or(0)))
}

/// Recover the original author of a mirror from its subtext.
///
/// Takes the last line of the message text; anything that does not look like
/// a caption line yields `None` ("cannot attribute"), never an error. When
/// the line carries a move origin, the channel mention and everything after
/// it (the executor) is discarded first so the executor is never mistaken
/// for the author.
pub fn decode_author(content: &str) -> Option<UserId> {
    let subtext = content.lines().last()?;
    if !subtext.starts_with(CAPTION_PREFIX) {
        return None;
    }

    let scan = match find_snowflake(subtext, "#") {
        Some((_, pos)) => &subtext[..pos],
        None => subtext,
    };

    find_snowflake(scan, "@").map(|(id, _)| UserId(id))
}

fn format_emoji(emoji: &ReactionEmoji) -> String {
    match emoji {
        ReactionEmoji::Unicode(s) => s.clone(),
        ReactionEmoji::Custom {
            id,
            name,
            animated,
            usable,
        } => {
            if *usable {
                let a = if *animated { "a" } else { "" };
                format!("<{a}:{name}:{}>", id.0)
            } else {
                // Unusable custom emoji degrade to a named link.
                let ext = if *animated { "gif" } else { "webp" };
                format!(
                    "[{name}](<https://cdn.discordapp.com/emojis/{}.{ext}>)",
                    id.0
                )
            }
        }
    }
}

fn format_reactions(reactions: &[Reaction]) -> String {
    reactions
        .iter()
        .map(|r| format!("{} ×{}", format_emoji(&r.emoji), r.count))
        .collect::<Vec<_>>()
        .join("   ")
}

pub fn format_skipped(skipped: usize) -> String {
    let plural = if skipped == 1 { "" } else { "s" };
    format!("Skipped {skipped} large attachment{plural}")
}

/// What happened to the source message's poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// The source had no poll.
    Absent,
    /// The poll is live and was carried over unchanged.
    Carried,
    /// The poll had already ended and was dropped.
    Dropped,
}

/// Assembles the subtext block for a mirror. Only non-empty fields render;
/// field order is fixed so the decoder stays stable.
pub struct Subtext {
    reactions: String,
    timestamp: String,
    author: String,
    move_hint: String,
    skipped: String,
    poll_notice: String,
}

impl Subtext {
    pub fn new(
        msg: &SourceMessage,
        executor: Option<UserId>,
        skipped_attachments: usize,
        poll: PollStatus,
    ) -> Self {
        // Proxy-authored sources carry their attribution in their own
        // subtext, so no fresh author line is rendered for them.
        let author = if msg.webhook_id.is_some() {
            String::new()
        } else {
            format!("Authored by {}", msg.author.id.mention())
        };

        let move_hint = match executor {
            Some(executor) => format!(
                "Moved from {} by {}",
                msg.channel_id.mention(),
                executor.mention()
            ),
            None => String::new(),
        };

        let skipped = if skipped_attachments > 0 {
            format_skipped(skipped_attachments)
        } else {
            String::new()
        };

        let poll_notice = if poll == PollStatus::Dropped {
            "Unable to attach closed poll".to_string()
        } else {
            String::new()
        };

        Self {
            reactions: format_reactions(&msg.reactions),
            timestamp: Self::format_timestamp(msg, Utc::now()),
            author,
            move_hint,
            skipped,
            poll_notice,
        }
    }

    fn format_timestamp(msg: &SourceMessage, now: DateTime<Utc>) -> String {
        if msg.created_at > now - Duration::hours(TIMESTAMP_GRACE_HOURS) {
            return String::new();
        }
        let mut out = dynamic_timestamp(msg.created_at, None);
        match msg.edited_at {
            Some(edited) if edited != msg.created_at => {
                out.push_str(&format!(
                    " (edited at {})",
                    dynamic_timestamp(edited, Some('t'))
                ));
            }
            _ => {}
        }
        out
    }

    /// Full subtext: reactions line plus the provenance context line.
    pub fn format(&self) -> String {
        let origin = match (&self.author[..], &self.timestamp[..]) {
            ("", ts) => ts.to_string(),
            (author, "") => author.to_string(),
            (author, ts) => format!("{author} on {ts}"),
        };
        let context = [
            origin.as_str(),
            self.move_hint.as_str(),
            self.skipped.as_str(),
            self.poll_notice.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" • ");
        sub_join(&[&self.reactions, &context])
    }

    /// Reduced subtext without attribution or move marks, for automated
    /// relocations that should not advertise themselves.
    pub fn format_simple(&self) -> String {
        sub_join(&[&self.reactions, &self.skipped, &self.poll_notice])
    }
}

fn sub_join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| format!("{CAPTION_PREFIX}{s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The subtext carried over when relocating a message that is already a
/// mirror: the existing block is split off and extended instead of being
/// re-encoded, so attribution survives chained moves.
pub struct CarriedSubtext {
    /// The mirror's visible text with the subtext stripped.
    pub content: String,
    reactions: Vec<(String, u64)>,
    subtext: String,
}

impl CarriedSubtext {
    /// Split a mirror's text into visible content and its trailing subtext.
    /// The caller must have established that `content` is a mirror of ours
    /// (via [`decode_author`] or a proxy lookup); the last line is then the
    /// subtext by construction.
    pub fn split(content: &str) -> Self {
        let mut lines: Vec<&str> = content.lines().collect();
        let subtext = lines.pop().unwrap_or_default().to_string();

        let reactions = lines
            .last()
            .map(|l| Self::parse_reactions(l))
            .unwrap_or_default();
        if !reactions.is_empty() {
            lines.pop();
        }

        Self {
            content: lines.join("\n"),
            reactions,
            subtext,
        }
    }

    fn parse_reactions(line: &str) -> Vec<(String, u64)> {
        let Some(rest) = line.strip_prefix(CAPTION_PREFIX) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for chunk in rest.split("   ") {
            let Some(caps) = reaction_regex().captures(chunk) else {
                // Not a reaction line after all; it may just be similarly
                // formatted text in the actual message content.
                return Vec::new();
            };
            let Ok(count) = caps[2].parse::<u64>() else {
                return Vec::new();
            };
            out.push((caps[1].to_string(), count));
        }
        out
    }

    /// Fold the latest move into the carried block: append the new origin to
    /// the provenance line and merge the source's current reactions into the
    /// carried counts.
    pub fn update(&mut self, msg: &SourceMessage, executor: Option<UserId>) {
        if let Some(executor) = executor {
            self.subtext.push_str(&format!(
                ", then from {} by {}",
                msg.channel_id.mention(),
                executor.mention()
            ));
        }
        for reaction in &msg.reactions {
            let emoji = format_emoji(&reaction.emoji);
            match self.reactions.iter_mut().find(|(e, _)| *e == emoji) {
                Some((_, count)) => *count += reaction.count,
                None => self.reactions.push((emoji, reaction.count)),
            }
        }
    }

    pub fn subtext(&self) -> String {
        if self.reactions.is_empty() {
            return self.subtext.clone();
        }
        let formatted = self
            .reactions
            .iter()
            .map(|(emoji, count)| format!("{emoji} ×{count}"))
            .collect::<Vec<_>>()
            .join("   ");
        format!("{CAPTION_PREFIX}{formatted}\n{}", self.subtext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelId, EmojiId, GuildId, MessageId, WebhookId};
    use crate::message::{Author, MessageKind};

    fn message(content: &str) -> SourceMessage {
        SourceMessage {
            id: MessageId(1),
            channel_id: ChannelId(500),
            guild_id: Some(GuildId(10)),
            channel_name: Some("general".to_string()),
            author: Author {
                id: UserId(900),
                display_name: "alice".to_string(),
                avatar_url: String::new(),
                bot: false,
            },
            kind: MessageKind::Default,
            content: content.to_string(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            stickers: Vec::new(),
            reactions: Vec::new(),
            poll: None,
            reference: None,
            interaction: None,
            webhook_id: None,
            created_at: Utc::now(),
            edited_at: None,
        }
    }

    #[test]
    fn finds_snowflakes() {
        let cases: &[(&str, &str, Option<(u64, usize)>)] = &[
            ("<@1234123>", "@", Some((1234123, 0))),
            ("foo <@1234123>", "@", Some((1234123, 4))),
            ("foo <#1234123>", "@", None),
            ("foo <#1234123>", "#", Some((1234123, 4))),
            ("lorem ipsum <*1234123 <#128381723>", "#", Some((128381723, 22))),
            ("lorem ipsum <#1234123 <#128381723>", "#", Some((128381723, 22))),
            ("join vc @ <#!12749128401294>!!", "#", None),
            ("join vc @ <#!12749128401294>", "#!", Some((12749128401294, 10))),
            ("join vc @ <12749128401294> :D", "", Some((12749128401294, 10))),
            ("join vc @ <#!12749128401294>", "@", None),
            ("<@<@1234869>", "@", Some((1234869, 2))),
            ("<@>", "@", None),
            ("<>", "", None),
            ("", "@", None),
            ("hi", "", None),
        ];
        for (content, sigil, expected) in cases {
            assert_eq!(
                find_snowflake(content, sigil),
                *expected,
                "find_snowflake({content:?}, {sigil:?})"
            );
        }
    }

    #[test]
    fn decodes_author_from_subtext() {
        let cases: &[(&str, Option<u64>)] = &[
            (
                "a\n-# Authored by <@665120188047556609> • \
                 Moved from <#1281624935558807678> by <@665120188047556609>",
                Some(665120188047556609),
            ),
            (
                "edit\n-# Authored by <@665120188047556609> on <t:1745489008> \
                 (edited at <t:1745927179:t>) • Moved from <#1281624935558807678> \
                 by <@665120188047556609>",
                Some(665120188047556609),
            ),
            (
                "a\n -# Moved from <#1281624935558807678> by <@665120188047556609>",
                None,
            ),
            (
                "-# (content attached)\n-# Authored by <@665120188047556609> • \
                 Moved from <#1281624935558807678> by <@665120188047556609>",
                Some(665120188047556609),
            ),
            (
                "-# (content attached)\n-# Moved from \
                 <#1281624935558807678> by <@665120188047556609>",
                None,
            ),
            ("test", None),
            ("", None),
            (
                "-# Moved from <#1281624935558807678> by <@665120188047556609>",
                None,
            ),
            ("-# Authored by <@665120188047556609>", Some(665120188047556609)),
            ("Authored by <@665120188047556609>", None),
            ("<@665120188047556609>", None),
            ("-#<@665120188047556609>", None),
            ("<@665120188047556609 go to <#1294988140645453834>", None),
        ];
        for (content, expected) in cases {
            assert_eq!(
                decode_author(content),
                expected.map(UserId),
                "decode_author({content:?})"
            );
        }
    }

    #[test]
    fn decode_author_code_block_blind_spot() {
        // Mention-shaped tokens inside code fences still decode; this is the
        // codec's accepted limitation, pinned here so it does not silently
        // change.
        assert_eq!(
            decode_author("-# Moved by `<@665120188047556609>`"),
            Some(UserId(665120188047556609))
        );
        assert_eq!(
            decode_author("-# Authored by ```<@665120188047556609>```"),
            Some(UserId(665120188047556609))
        );
    }

    #[test]
    fn recent_moderator_move_renders_reactions_and_origin_only() {
        let mut msg = message("hi");
        // Proxy-authored: attribution lives in the carried subtext, so the
        // fresh block has no author line.
        msg.webhook_id = Some(WebhookId(1));
        msg.reactions = vec![Reaction {
            emoji: ReactionEmoji::Unicode("👍".to_string()),
            count: 2,
        }];

        let s = Subtext::new(&msg, Some(UserId(777)), 0, PollStatus::Absent);
        let rendered = s.format();
        assert_eq!(rendered, "-# 👍 ×2\n-# Moved from <#500> by <@777>");
        assert_eq!(decode_author(&rendered), None);
    }

    #[test]
    fn authored_move_decodes_back_to_author() {
        let msg = message("hi");
        let s = Subtext::new(&msg, Some(UserId(777)), 0, PollStatus::Absent);
        let rendered = s.format();
        assert_eq!(rendered, "-# Authored by <@900> • Moved from <#500> by <@777>");
        assert_eq!(decode_author(&rendered), Some(UserId(900)));
    }

    #[test]
    fn old_message_gets_timestamp_with_edit_suffix() {
        let mut msg = message("hi");
        msg.created_at = Utc::now() - Duration::hours(48);
        msg.edited_at = Some(msg.created_at + Duration::hours(1));

        let s = Subtext::new(&msg, None, 0, PollStatus::Absent);
        let created = msg.created_at.timestamp();
        let edited = msg.edited_at.unwrap().timestamp();
        assert_eq!(
            s.format(),
            format!("-# Authored by <@900> on <t:{created}> (edited at <t:{edited}:t>)")
        );
    }

    #[test]
    fn recent_message_has_no_timestamp() {
        let msg = message("hi");
        let s = Subtext::new(&msg, None, 0, PollStatus::Absent);
        assert_eq!(s.format(), "-# Authored by <@900>");
    }

    #[test]
    fn skipped_and_poll_fields_render_in_order() {
        let mut msg = message("hi");
        msg.poll = None;
        let s = Subtext::new(&msg, Some(UserId(777)), 2, PollStatus::Dropped);
        assert_eq!(
            s.format(),
            "-# Authored by <@900> • Moved from <#500> by <@777> • \
             Skipped 2 large attachments • Unable to attach closed poll"
        );
    }

    #[test]
    fn simple_format_has_no_attribution() {
        let mut msg = message("hi");
        msg.reactions = vec![Reaction {
            emoji: ReactionEmoji::Unicode("🎉".to_string()),
            count: 1,
        }];
        let s = Subtext::new(&msg, Some(UserId(777)), 1, PollStatus::Absent);
        assert_eq!(s.format_simple(), "-# 🎉 ×1\n-# Skipped 1 large attachment");
    }

    #[test]
    fn unusable_custom_emoji_renders_as_link() {
        let mut msg = message("hi");
        msg.reactions = vec![Reaction {
            emoji: ReactionEmoji::Custom {
                id: EmojiId(4242),
                name: "blob".to_string(),
                animated: false,
                usable: false,
            },
            count: 3,
        }];
        let s = Subtext::new(&msg, None, 0, PollStatus::Absent);
        assert_eq!(
            s.format(),
            "-# [blob](<https://cdn.discordapp.com/emojis/4242.webp>) ×3\n\
             -# Authored by <@900>"
        );
    }

    #[test]
    fn carried_subtext_splits_and_merges() {
        let mirror_text = "hello\n-# 👍 ×2\n-# Authored by <@900>";
        let mut carried = CarriedSubtext::split(mirror_text);
        assert_eq!(carried.content, "hello");

        let mut msg = message("hello");
        msg.reactions = vec![
            Reaction {
                emoji: ReactionEmoji::Unicode("👍".to_string()),
                count: 1,
            },
            Reaction {
                emoji: ReactionEmoji::Unicode("🎉".to_string()),
                count: 4,
            },
        ];
        carried.update(&msg, Some(UserId(777)));

        assert_eq!(
            carried.subtext(),
            "-# 👍 ×3   🎉 ×4\n-# Authored by <@900>, then from <#500> by <@777>"
        );
    }

    #[test]
    fn carried_subtext_ignores_lookalike_reaction_line() {
        let mirror_text = "some text   more ×text\n-# Authored by <@900>";
        let carried = CarriedSubtext::split(mirror_text);
        assert_eq!(carried.content, "some text   more ×text");
        assert_eq!(carried.subtext(), "-# Authored by <@900>");
    }
}
