//! Proxy-identity management: one named send-as-webhook credential per
//! channel, created lazily, deduplicated by name, and recreated when stale.

use crate::domain::{ChannelId, UserId};
use crate::message::SourceMessage;
use crate::messaging::{MessageLookup, ProxyIdentity, ProxyPort};
use crate::subtext::decode_author;
use crate::Result;

/// Reuse the channel's credential with the expected name, deleting stale
/// ones (discoverable only as "no longer usable") along the way; create a
/// fresh credential when none survives.
pub async fn get_or_create_identity(
    proxy: &dyn ProxyPort,
    channel: ChannelId,
    name: &str,
) -> Result<ProxyIdentity> {
    for identity in proxy.list_identities(channel).await? {
        if identity.name != name {
            continue;
        }
        if identity.usable {
            return Ok(identity);
        }
        proxy.delete_identity(identity.id).await?;
    }

    proxy.create_identity(channel, name).await
}

/// A message confirmed to be one of our mirrors, with its recovered
/// provenance.
#[derive(Clone, Debug)]
pub struct Mirror {
    pub message: Box<SourceMessage>,
    pub identity: ProxyIdentity,
    pub original_author: UserId,
}

/// Outcome of classifying an arbitrary message as one of our mirrors.
#[derive(Clone, Debug)]
pub enum MirrorLookup {
    Found(Mirror),
    /// Not produced by our proxy identity (or carrying no decodable
    /// attribution).
    NotMoved,
    /// It may well be a mirror, but the bot cannot confirm it.
    NotFound,
}

/// Classify `msg`. This is the restart-safe path: no association state is
/// consulted, only the platform and the subtext codec.
pub async fn find_mirror(
    proxy: &dyn ProxyPort,
    msg: &SourceMessage,
    name: &str,
) -> Result<MirrorLookup> {
    let Some(webhook_id) = msg.webhook_id else {
        return Ok(MirrorLookup::NotMoved);
    };

    let identities = proxy.list_identities(msg.channel_id).await?;
    let Some(identity) = identities.into_iter().find(|i| i.id == webhook_id) else {
        return Ok(MirrorLookup::NotMoved);
    };
    if identity.name != name {
        return Ok(MirrorLookup::NotMoved);
    }

    match proxy.fetch_own_message(&identity, msg.message_ref()).await? {
        MessageLookup::Found(message) => match decode_author(&message.content) {
            Some(original_author) => Ok(MirrorLookup::Found(Mirror {
                message,
                identity,
                original_author,
            })),
            None => Ok(MirrorLookup::NotMoved),
        },
        // The *identity* cannot find the message: everything we sent through
        // it is findable, so this is someone else's message, not a mirror.
        MessageLookup::Deleted => Ok(MirrorLookup::NotMoved),
        MessageLookup::Inaccessible => Ok(MirrorLookup::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::domain::{MessageId, MessageRef, WebhookId};
    use crate::message::{Author, MessageKind};
    use crate::messaging::{Destination, MirrorPayload};

    struct FakeProxy {
        identities: Mutex<Vec<ProxyIdentity>>,
        deleted: Mutex<Vec<WebhookId>>,
        created: Mutex<u64>,
        mirror_content: Option<String>,
    }

    impl FakeProxy {
        fn with_identities(identities: Vec<ProxyIdentity>) -> Self {
            Self {
                identities: Mutex::new(identities),
                deleted: Mutex::new(Vec::new()),
                created: Mutex::new(0),
                mirror_content: None,
            }
        }
    }

    #[async_trait]
    impl ProxyPort for FakeProxy {
        async fn list_identities(&self, _channel: ChannelId) -> Result<Vec<ProxyIdentity>> {
            Ok(self.identities.lock().unwrap().clone())
        }

        async fn create_identity(
            &self,
            _channel: ChannelId,
            name: &str,
        ) -> Result<ProxyIdentity> {
            let mut created = self.created.lock().unwrap();
            *created += 1;
            Ok(ProxyIdentity {
                id: WebhookId(9000 + *created),
                name: name.to_string(),
                usable: true,
            })
        }

        async fn delete_identity(&self, identity: WebhookId) -> Result<()> {
            self.deleted.lock().unwrap().push(identity);
            self.identities.lock().unwrap().retain(|i| i.id != identity);
            Ok(())
        }

        async fn send(
            &self,
            _identity: &ProxyIdentity,
            _destination: &Destination,
            _payload: &MirrorPayload,
        ) -> Result<MessageRef> {
            unimplemented!("not used in these tests")
        }

        async fn edit(
            &self,
            _identity: &ProxyIdentity,
            _mirror: MessageRef,
            _payload: &MirrorPayload,
        ) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _identity: &ProxyIdentity, _mirror: MessageRef) -> Result<()> {
            Ok(())
        }

        async fn fetch_own_message(
            &self,
            _identity: &ProxyIdentity,
            mirror: MessageRef,
        ) -> Result<MessageLookup> {
            match &self.mirror_content {
                Some(content) => Ok(MessageLookup::Found(Box::new(SourceMessage {
                    id: mirror.message_id,
                    channel_id: mirror.channel_id,
                    guild_id: None,
                    channel_name: None,
                    author: Author {
                        id: UserId(0),
                        display_name: "proxy".to_string(),
                        avatar_url: String::new(),
                        bot: true,
                    },
                    kind: MessageKind::Default,
                    content: content.clone(),
                    attachments: Vec::new(),
                    embeds: Vec::new(),
                    stickers: Vec::new(),
                    reactions: Vec::new(),
                    poll: None,
                    reference: None,
                    interaction: None,
                    webhook_id: Some(WebhookId(77)),
                    created_at: Utc::now(),
                    edited_at: None,
                }))),
                None => Ok(MessageLookup::Deleted),
            }
        }
    }

    fn webhook_message(webhook_id: Option<u64>) -> SourceMessage {
        SourceMessage {
            id: MessageId(1),
            channel_id: ChannelId(5),
            guild_id: None,
            channel_name: None,
            author: Author {
                id: UserId(0),
                display_name: "proxy".to_string(),
                avatar_url: String::new(),
                bot: true,
            },
            kind: MessageKind::Default,
            content: String::new(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            stickers: Vec::new(),
            reactions: Vec::new(),
            poll: None,
            reference: None,
            interaction: None,
            webhook_id: webhook_id.map(WebhookId),
            created_at: Utc::now(),
            edited_at: None,
        }
    }

    #[tokio::test]
    async fn reuses_usable_identity_with_matching_name() {
        let existing = ProxyIdentity {
            id: WebhookId(77),
            name: "Mod".to_string(),
            usable: true,
        };
        let proxy = FakeProxy::with_identities(vec![existing.clone()]);

        let identity = get_or_create_identity(&proxy, ChannelId(5), "Mod")
            .await
            .unwrap();
        assert_eq!(identity, existing);
        assert_eq!(*proxy.created.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_identity_is_deleted_and_recreated() {
        let proxy = FakeProxy::with_identities(vec![ProxyIdentity {
            id: WebhookId(77),
            name: "Mod".to_string(),
            usable: false,
        }]);

        let identity = get_or_create_identity(&proxy, ChannelId(5), "Mod")
            .await
            .unwrap();
        assert!(identity.usable);
        assert_eq!(*proxy.deleted.lock().unwrap(), vec![WebhookId(77)]);
        assert_eq!(*proxy.created.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn other_names_are_left_alone() {
        let proxy = FakeProxy::with_identities(vec![ProxyIdentity {
            id: WebhookId(40),
            name: "Other Bot".to_string(),
            usable: true,
        }]);

        get_or_create_identity(&proxy, ChannelId(5), "Mod")
            .await
            .unwrap();
        assert!(proxy.deleted.lock().unwrap().is_empty());
        assert_eq!(*proxy.created.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn plain_message_is_not_a_mirror() {
        let proxy = FakeProxy::with_identities(Vec::new());
        let msg = webhook_message(None);
        assert!(matches!(
            find_mirror(&proxy, &msg, "Mod").await.unwrap(),
            MirrorLookup::NotMoved
        ));
    }

    #[tokio::test]
    async fn foreign_webhook_is_not_a_mirror() {
        let proxy = FakeProxy::with_identities(vec![ProxyIdentity {
            id: WebhookId(40),
            name: "Other Bot".to_string(),
            usable: true,
        }]);
        let msg = webhook_message(Some(40));
        assert!(matches!(
            find_mirror(&proxy, &msg, "Mod").await.unwrap(),
            MirrorLookup::NotMoved
        ));
    }

    #[tokio::test]
    async fn mirror_with_attribution_is_found() {
        let mut proxy = FakeProxy::with_identities(vec![ProxyIdentity {
            id: WebhookId(77),
            name: "Mod".to_string(),
            usable: true,
        }]);
        proxy.mirror_content = Some("hi\n-# Authored by <@900>".to_string());

        let msg = webhook_message(Some(77));
        match find_mirror(&proxy, &msg, "Mod").await.unwrap() {
            MirrorLookup::Found(mirror) => {
                assert_eq!(mirror.original_author, UserId(900));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mirror_without_attribution_is_not_moved() {
        let mut proxy = FakeProxy::with_identities(vec![ProxyIdentity {
            id: WebhookId(77),
            name: "Mod".to_string(),
            usable: true,
        }]);
        proxy.mirror_content = Some("hi\n-# Moved from <#1> by <@2>".to_string());

        let msg = webhook_message(Some(77));
        assert!(matches!(
            find_mirror(&proxy, &msg, "Mod").await.unwrap(),
            MirrorLookup::NotMoved
        ));
    }
}
