use async_trait::async_trait;

use crate::{
    domain::{ChannelId, EmojiId, GuildId, MessageRef, WebhookId},
    messaging::types::{Destination, MessageLookup, MirrorPayload, ProxyIdentity},
    Result,
};

/// Read/write access to ordinary platform messages.
///
/// The adapter implements this over the Discord HTTP client; tests use
/// in-memory fakes. Errors are platform failures; "the message is gone" and
/// "the channel is invisible" are values, not errors.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn fetch_message(&self, message: MessageRef) -> Result<MessageLookup>;

    async fn delete_message(&self, message: MessageRef) -> Result<()>;

    /// Download an attachment for re-upload.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// HEAD-probe an image URL; true when the CDN actually serves it.
    async fn probe_image(&self, url: &str) -> Result<bool>;

    /// Home guild of a custom emoji, when the bot can see it at all.
    fn emoji_guild(&self, emoji: EmojiId) -> Option<GuildId>;
}

/// Proxy-identity (webhook) management and sending.
#[async_trait]
pub trait ProxyPort: Send + Sync {
    async fn list_identities(&self, channel: ChannelId) -> Result<Vec<ProxyIdentity>>;

    async fn create_identity(&self, channel: ChannelId, name: &str) -> Result<ProxyIdentity>;

    async fn delete_identity(&self, identity: WebhookId) -> Result<()>;

    /// Send a mirror under `identity`. Returns the mirror's handle only once
    /// the platform has acknowledged the send.
    async fn send(
        &self,
        identity: &ProxyIdentity,
        destination: &Destination,
        payload: &MirrorPayload,
    ) -> Result<MessageRef>;

    async fn edit(
        &self,
        identity: &ProxyIdentity,
        mirror: MessageRef,
        payload: &MirrorPayload,
    ) -> Result<()>;

    async fn delete(&self, identity: &ProxyIdentity, mirror: MessageRef) -> Result<()>;

    /// Fetch a message *as the identity*, confirming it was sent by it.
    async fn fetch_own_message(
        &self,
        identity: &ProxyIdentity,
        mirror: MessageRef,
    ) -> Result<MessageLookup>;
}
