//! Generic edit/delete propagation between a source message and its
//! mirrors, parameterized over the feature that renders the mirror content.

use async_trait::async_trait;

use crate::domain::MessageRef;
use crate::linker::MessageLinker;
use crate::message::{Embed, FileData, SourceMessage};
use crate::Result;

/// Rendered mirror content for a source message. `item_count` is the number
/// of renderable items found; zero (or negative sentinel values used by some
/// processors) means the mirror should not exist.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessedMessage {
    pub item_count: i64,
    pub content: String,
    pub files: Vec<FileData>,
    pub embeds: Vec<Embed>,
}

/// The feature side of the consistency layer: how to render a source into
/// mirror content and how to send/edit/delete the mirror itself.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, msg: &SourceMessage) -> Result<ProcessedMessage>;

    /// Send a brand-new mirror for `msg`; returns its handle for linking, or
    /// `None` when nothing was sent.
    async fn publish(
        &self,
        msg: &SourceMessage,
        output: ProcessedMessage,
    ) -> Result<Option<MessageRef>>;

    async fn edit_mirror(&self, mirror: MessageRef, output: &ProcessedMessage) -> Result<()>;

    async fn delete_mirror(&self, mirror: MessageRef) -> Result<()>;
}

/// React to a source-message edit.
///
/// No-ops when the text is unchanged, the edge is expired (it is unlinked on
/// the spot), the edge is frozen, or re-rendering yields the same output.
/// With no edge and no previously renderable items, the edit is treated as a
/// brand-new message. When the new render has nothing left to show, the
/// mirrors are deleted and the edge removed; otherwise the mirrors are
/// edited in place and the edge's expiry clock refreshed.
pub async fn on_source_edited(
    linker: &mut MessageLinker,
    processor: &dyn MessageProcessor,
    before: &SourceMessage,
    after: &SourceMessage,
) -> Result<()> {
    if before.content == after.content {
        return Ok(());
    }

    let source = before.message_ref();
    if linker.is_expired(source) {
        // The edge outlived its propagation window; drop it instead of
        // acting on a stale mirror.
        linker.unlink(source);
        return Ok(());
    }

    let old_output = processor.process(before).await?;
    let new_output = processor.process(after).await?;
    if old_output == new_output {
        // Message changed but the rendered mirror would not.
        return Ok(());
    }

    let Some(edge) = linker.get(source) else {
        if old_output.item_count > 0 {
            // There was a mirror once and it is gone (most likely deleted by
            // its owner); do not resurrect it.
            return Ok(());
        }
        if new_output.item_count > 0 {
            if let Some(mirror) = processor.publish(after, new_output).await? {
                linker.link(source, vec![mirror]);
            }
        }
        return Ok(());
    };

    if edge.frozen {
        return Ok(());
    }
    let mirrors = edge.mirrors.clone();

    if new_output.item_count <= 0 {
        // Everything renderable was edited out.
        linker.unlink(source);
        for mirror in mirrors {
            processor.delete_mirror(mirror).await?;
        }
        return Ok(());
    }

    for mirror in &mirrors {
        processor.edit_mirror(*mirror, &new_output).await?;
    }
    linker.touch(source);
    Ok(())
}

/// React to a source-message deletion: tear down the edge, and take the
/// mirrors with it unless the edge was frozen (the user opted out of
/// propagation) or expired. Takes only the identity, since delete events
/// carry no message body.
pub async fn on_source_deleted(
    linker: &mut MessageLinker,
    processor: &dyn MessageProcessor,
    source: MessageRef,
) -> Result<()> {
    let Some(edge) = linker.get(source) else {
        return Ok(());
    };
    let propagate = !edge.frozen && !linker.is_expired(source);
    let mirrors = edge.mirrors.clone();

    linker.unlink(source);
    if propagate {
        for mirror in mirrors {
            processor.delete_mirror(mirror).await?;
        }
    }
    Ok(())
}

/// React to a mirror deletion: unlink the owning edge. The source itself is
/// left alone (it may already be gone, or be intentionally kept). Never
/// errors, regardless of frozen or expired state.
pub fn on_mirror_deleted(linker: &mut MessageLinker, mirror: MessageRef) {
    linker.unlink_mirror(mirror);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::{ChannelId, MessageId, UserId};
    use crate::linker::EDGE_EXPIRY_HOURS;
    use crate::message::{Author, MessageKind};

    fn mref(channel: u64, message: u64) -> MessageRef {
        MessageRef {
            channel_id: ChannelId(channel),
            message_id: MessageId(message),
        }
    }

    fn message(id: u64, content: &str) -> SourceMessage {
        SourceMessage {
            id: MessageId(id),
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

    /// Renders one "item" per word starting with '#'; published mirrors land
    /// in channel 2 with the source's id offset.
    #[derive(Default)]
    struct FakeProcessor {
        edits: Mutex<Vec<MessageRef>>,
        deletes: Mutex<Vec<MessageRef>>,
        publishes: Mutex<Vec<MessageRef>>,
    }

    #[async_trait]
    impl MessageProcessor for FakeProcessor {
        async fn process(&self, msg: &SourceMessage) -> Result<ProcessedMessage> {
            let items: Vec<&str> = msg
                .content
                .split_whitespace()
                .filter(|w| w.starts_with('#'))
                .collect();
            Ok(ProcessedMessage {
                item_count: items.len() as i64,
                content: items.join(", "),
                files: Vec::new(),
                embeds: Vec::new(),
            })
        }

        async fn publish(
            &self,
            msg: &SourceMessage,
            _output: ProcessedMessage,
        ) -> Result<Option<MessageRef>> {
            let mirror = mref(2, msg.id.0 + 1000);
            self.publishes.lock().unwrap().push(mirror);
            Ok(Some(mirror))
        }

        async fn edit_mirror(
            &self,
            mirror: MessageRef,
            _output: &ProcessedMessage,
        ) -> Result<()> {
            self.edits.lock().unwrap().push(mirror);
            Ok(())
        }

        async fn delete_mirror(&self, mirror: MessageRef) -> Result<()> {
            self.deletes.lock().unwrap().push(mirror);
            Ok(())
        }
    }

    #[tokio::test]
    async fn edit_of_active_edge_updates_mirror() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let before = message(10, "see #one");
        let after = message(10, "see #one and #two");
        linker.link(before.message_ref(), vec![mref(2, 20)]);

        on_source_edited(&mut linker, &processor, &before, &after)
            .await
            .unwrap();

        assert_eq!(*processor.edits.lock().unwrap(), vec![mref(2, 20)]);
        assert!(linker.get(before.message_ref()).is_some());
    }

    #[tokio::test]
    async fn edit_of_frozen_edge_is_ignored() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let before = message(10, "see #one");
        let after = message(10, "see #two");
        linker.link(before.message_ref(), vec![mref(2, 20)]);
        linker.freeze(before.message_ref());

        on_source_edited(&mut linker, &processor, &before, &after)
            .await
            .unwrap();

        assert!(processor.edits.lock().unwrap().is_empty());
        assert!(processor.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_of_expired_edge_unlinks_without_touching_mirror() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let before = message(10, "see #one");
        let after = message(10, "see #two");
        linker.link(before.message_ref(), vec![mref(2, 20)]);
        linker.backdate(
            before.message_ref(),
            Duration::hours(EDGE_EXPIRY_HOURS + 1),
        );

        on_source_edited(&mut linker, &processor, &before, &after)
            .await
            .unwrap();

        assert!(processor.edits.lock().unwrap().is_empty());
        assert!(linker.get(before.message_ref()).is_none());
    }

    #[tokio::test]
    async fn unchanged_content_is_a_noop() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let msg = message(10, "see #one");
        linker.link(msg.message_ref(), vec![mref(2, 20)]);

        on_source_edited(&mut linker, &processor, &msg, &msg)
            .await
            .unwrap();

        assert!(processor.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn editing_all_items_out_deletes_mirror() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let before = message(10, "see #one");
        let after = message(10, "nothing here");
        linker.link(before.message_ref(), vec![mref(2, 20)]);

        on_source_edited(&mut linker, &processor, &before, &after)
            .await
            .unwrap();

        assert_eq!(*processor.deletes.lock().unwrap(), vec![mref(2, 20)]);
        assert!(linker.get(before.message_ref()).is_none());
    }

    #[tokio::test]
    async fn edit_adding_first_item_publishes_new_mirror() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let before = message(10, "nothing");
        let after = message(10, "now #one");

        on_source_edited(&mut linker, &processor, &before, &after)
            .await
            .unwrap();

        assert_eq!(processor.publishes.lock().unwrap().len(), 1);
        assert_eq!(
            linker.mirrors(before.message_ref()),
            vec![mref(2, 1010)]
        );
    }

    #[tokio::test]
    async fn edit_after_mirror_removal_does_not_resurrect() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        // Old content had items but there is no edge: the mirror was removed
        // at some point.
        let before = message(10, "see #one");
        let after = message(10, "see #one and #two");

        on_source_edited(&mut linker, &processor, &before, &after)
            .await
            .unwrap();

        assert!(processor.publishes.lock().unwrap().is_empty());
        assert!(linker.is_empty());
    }

    #[tokio::test]
    async fn source_delete_removes_mirror_and_edge() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let msg = message(10, "see #one");
        linker.link(msg.message_ref(), vec![mref(2, 20)]);

        on_source_deleted(&mut linker, &processor, msg.message_ref())
            .await
            .unwrap();

        assert_eq!(*processor.deletes.lock().unwrap(), vec![mref(2, 20)]);
        assert!(linker.is_empty());
    }

    #[tokio::test]
    async fn source_delete_on_frozen_edge_only_unlinks() {
        let mut linker = MessageLinker::new();
        let processor = FakeProcessor::default();
        let msg = message(10, "see #one");
        linker.link(msg.message_ref(), vec![mref(2, 20)]);
        linker.freeze(msg.message_ref());

        on_source_deleted(&mut linker, &processor, msg.message_ref())
            .await
            .unwrap();

        assert!(processor.deletes.lock().unwrap().is_empty());
        assert!(linker.is_empty());
    }

    #[tokio::test]
    async fn mirror_delete_unlinks_even_when_frozen_or_expired() {
        let mut linker = MessageLinker::new();
        let source = mref(1, 10);
        linker.link(source, vec![mref(2, 20)]);
        linker.freeze(source);
        linker.backdate(source, Duration::hours(EDGE_EXPIRY_HOURS + 1));

        on_mirror_deleted(&mut linker, mref(2, 20));
        assert!(linker.is_empty());

        // And again on an already-gone mirror: still no panic.
        on_mirror_deleted(&mut linker, mref(2, 20));
    }
}
