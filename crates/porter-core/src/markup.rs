use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::domain::{EmojiId, GuildId};

fn emoji_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(a?):(\w+):(\d+)>").expect("emoji regex"))
}

/// Rewrite custom-emoji tokens as concealed hyperlinks so they stay legible
/// for readers outside the emoji's home guild. Emoji belonging to
/// `home_guild` are kept as-is unless `force` is set (used when relocating
/// across guilds).
///
/// `emoji_guild` reports the home guild of an emoji the bot can see; unknown
/// emoji are always rewritten.
pub fn convert_custom_emojis(
    content: &str,
    home_guild: GuildId,
    force: bool,
    emoji_guild: impl Fn(EmojiId) -> Option<GuildId>,
) -> String {
    emoji_regex()
        .replace_all(content, |caps: &Captures<'_>| {
            let animated = !caps[1].is_empty();
            let name = &caps[2];
            let id = caps[3].parse::<u64>().ok();

            if let Some(id) = id {
                if !force && emoji_guild(EmojiId(id)) == Some(home_guild) {
                    return caps[0].to_string();
                }
            }

            let Some(id) = id else {
                return caps[0].to_string();
            };
            let ext = if animated { "gif" } else { "webp" };
            let tag = if animated { "&animated=true" } else { "" };
            format!(
                "[{name}](<https://cdn.discordapp.com/emojis/{id}.{ext}?size=48{tag}&name={name}>)"
            )
        })
        .into_owned()
}

/// Truncate to `length` characters, ellipsized.
pub fn truncate(s: &str, length: usize) -> String {
    if s.chars().count() <= length {
        return s.to_string();
    }
    let mut out: String = s.chars().take(length.saturating_sub(1)).collect();
    out.push('…');
    out
}
