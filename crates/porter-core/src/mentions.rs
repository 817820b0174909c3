//! Entity mentions: `owner/repo#123`-style signatures in chat messages are
//! resolved through a TTR cache and summarized in a single mirror message,
//! which the association layer then keeps consistent with its source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::cache::{Fetch, TtrCache};
use crate::message::SourceMessage;
use crate::subtext::dynamic_timestamp;
use crate::Result;

/// Platform ceiling shared with autocomplete listings.
pub const MAX_ENTITIES: usize = 25;

/// Bare `#N` references below this are almost always ordinals, not
/// entities, and are ignored.
const MIN_BARE_NUMBER: u64 = 10;

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Trailing-context checks (word boundary, version-number suffix) are
    // applied manually after the match.
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\b(?P<owner>[a-z0-9][a-z0-9\-]*)/)?(?P<repo>\b[a-z0-9][a-z0-9\-\._]*)?#(?P<number>[0-9]{1,6})")
            .expect("entity regex")
    })
}

fn codeblock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("codeblock regex"))
}

/// A fully-qualified entity signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Issue,
    PullRequest,
}

impl EntityKind {
    fn label(self) -> &'static str {
        match self {
            EntityKind::Issue => "Issue",
            EntityKind::PullRequest => "PR",
        }
    }
}

/// What the code-hosting side knows about an entity. The client producing
/// these is an external collaborator behind [`EntityResolver`].
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySummary {
    pub kind: EntityKind,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Port to the code-hosting API. `Ok(None)` means "no such entity" and is
/// cached as an absence; errors are transient and never cached.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve(&self, entity: &EntityRef) -> Result<Option<EntitySummary>>;
}

struct ResolverFetch;

#[async_trait]
impl Fetch<EntityRef, EntitySummary, Arc<dyn EntityResolver>> for ResolverFetch {
    async fn fetch(
        &self,
        key: &EntityRef,
        resolver: &Arc<dyn EntityResolver>,
    ) -> Result<Option<EntitySummary>> {
        resolver.resolve(key).await
    }
}

/// Scans message content for entity signatures and renders the summary
/// mirror text.
pub struct MentionScanner {
    resolver: Arc<dyn EntityResolver>,
    cache: TtrCache<EntityRef, EntitySummary>,
    default_owner: String,
    default_repo: String,
}

impl MentionScanner {
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        ttr: Duration,
        default_owner: String,
        default_repo: String,
    ) -> Self {
        Self {
            resolver,
            cache: TtrCache::new(ttr),
            default_owner,
            default_repo,
        }
    }

    /// Extract entity signatures, in order of first appearance, with
    /// duplicates removed. Signatures inside fenced code blocks are ignored.
    pub fn scan(&self, content: &str) -> Vec<EntityRef> {
        let stripped = codeblock_regex().replace_all(content, "");
        let mut seen = Vec::new();

        for caps in entity_regex().captures_iter(&stripped) {
            let whole = caps.get(0).expect("match");
            if !valid_tail(&stripped, whole.end()) {
                continue;
            }

            let owner = caps.name("owner").map(|m| m.as_str().to_lowercase());
            let repo = caps.name("repo").map(|m| m.as_str().to_lowercase());
            let number: u64 = match caps["number"].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };

            let entity = match (owner, repo) {
                (None, None) if number < MIN_BARE_NUMBER => continue,
                (None, None) => EntityRef {
                    owner: self.default_owner.clone(),
                    repo: self.default_repo.clone(),
                    number,
                },
                (None, Some(repo)) => EntityRef {
                    owner: self.default_owner.clone(),
                    repo,
                    number,
                },
                (Some(owner), Some(repo)) => EntityRef {
                    owner,
                    repo,
                    number,
                },
                (Some(_), None) => continue,
            };

            if !seen.contains(&entity) {
                seen.push(entity);
            }
        }

        seen.truncate(MAX_ENTITIES);
        seen
    }

    /// Render the summary mirror for `msg`: one formatted block per
    /// resolvable entity, plus the count of entities found.
    pub async fn entity_message(&self, msg: &SourceMessage) -> Result<(String, usize)> {
        let mut blocks = Vec::new();
        for entity in self.scan(&msg.content) {
            let summary = self
                .cache
                .get(entity.clone(), &self.resolver, &ResolverFetch)
                .await?;
            if let Some(summary) = summary {
                blocks.push(format_mention(&entity, &summary));
            }
        }
        let count = blocks.len();
        Ok((blocks.join("\n"), count))
    }
}

/// Word-boundary and version-number checks the regex cannot express.
fn valid_tail(haystack: &str, end: usize) -> bool {
    let mut rest = haystack[end..].chars();
    match rest.next() {
        None => true,
        Some('.') => !matches!(rest.next(), Some(c) if c.is_ascii_digit()),
        Some(c) => !(c.is_alphanumeric() || c == '_'),
    }
}

fn format_mention(entity: &EntityRef, summary: &EntitySummary) -> String {
    let headline = format!(
        "**{} [#{}](<{}>):** {}",
        summary.kind.label(),
        summary.number,
        summary.url,
        summary.title
    );
    let subtext = format!(
        "-# by [`{author}`](<https://github.com/{author}>) in \
         [`{owner}/{repo}`](<https://github.com/{owner}/{repo}>) on {} ({})",
        dynamic_timestamp(summary.created_at, Some('D')),
        dynamic_timestamp(summary.created_at, Some('R')),
        author = summary.author,
        owner = entity.owner,
        repo = entity.repo,
    );
    format!("{headline}\n{subtext}\n")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct StaticResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntityResolver for StaticResolver {
        async fn resolve(&self, entity: &EntityRef) -> Result<Option<EntitySummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if entity.number == 404 {
                return Ok(None);
            }
            Ok(Some(EntitySummary {
                kind: EntityKind::Issue,
                number: entity.number,
                title: format!("issue {}", entity.number),
                url: format!(
                    "https://github.com/{}/{}/issues/{}",
                    entity.owner, entity.repo, entity.number
                ),
                author: "octocat".to_string(),
                created_at: Utc::now(),
            }))
        }
    }

    fn scanner() -> MentionScanner {
        MentionScanner::new(
            Arc::new(StaticResolver {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(1800),
            "acme".to_string(),
            "widgets".to_string(),
        )
    }

    fn refs(content: &str) -> Vec<(String, String, u64)> {
        scanner()
            .scan(content)
            .into_iter()
            .map(|e| (e.owner, e.repo, e.number))
            .collect()
    }

    #[test]
    fn bare_number_uses_defaults() {
        assert_eq!(
            refs("see #2354 for details"),
            vec![("acme".to_string(), "widgets".to_string(), 2354)]
        );
    }

    #[test]
    fn single_digit_bare_numbers_are_ignored() {
        assert!(refs("my top #1 pick, maybe #2").is_empty());
        // With an explicit repo, small numbers are meaningful.
        assert_eq!(
            refs("uv#2"),
            vec![("acme".to_string(), "uv".to_string(), 2)]
        );
    }

    #[test]
    fn owner_repo_signature_is_used_verbatim() {
        assert_eq!(
            refs("fixed by rust-lang/rust#9001"),
            vec![("rust-lang".to_string(), "rust".to_string(), 9001)]
        );
    }

    #[test]
    fn code_blocks_are_skipped() {
        let content = "real #1234\n```\nfake #5678\n```\ntrailing";
        assert_eq!(
            refs(content),
            vec![("acme".to_string(), "widgets".to_string(), 1234)]
        );
    }

    #[test]
    fn version_numbers_do_not_match() {
        assert!(refs("released in v2#1.2 today").is_empty());
    }

    #[test]
    fn duplicates_collapse_in_order() {
        assert_eq!(
            refs("#111 then #222 then #111 again"),
            vec![
                ("acme".to_string(), "widgets".to_string(), 111),
                ("acme".to_string(), "widgets".to_string(), 222),
            ]
        );
    }

    fn plain_message(content: &str) -> SourceMessage {
        use crate::domain::{ChannelId, MessageId, UserId};
        use crate::message::{Author, MessageKind};

        SourceMessage {
            id: MessageId(1),
            channel_id: ChannelId(1),
            guild_id: None,
            channel_name: None,
            author: Author {
                id: UserId(5),
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

    #[tokio::test]
    async fn unresolvable_entities_are_dropped_from_the_summary() {
        let scanner = scanner();
        let msg = plain_message("see #404 and #123");

        let (text, count) = scanner.entity_message(&msg).await.unwrap();
        assert_eq!(count, 1);
        assert!(text.contains("issue 123"));
        assert!(!text.contains("404"));
    }

    #[tokio::test]
    async fn repeated_renders_hit_the_cache() {
        let resolver = Arc::new(StaticResolver {
            calls: AtomicUsize::new(0),
        });
        let scanner = MentionScanner::new(
            resolver.clone() as Arc<dyn EntityResolver>,
            Duration::from_secs(1800),
            "acme".to_string(),
            "widgets".to_string(),
        );
        let msg = plain_message("see #123");

        scanner.entity_message(&msg).await.unwrap();
        scanner.entity_message(&msg).await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
