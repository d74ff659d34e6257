//! The mirror and reply handlers.
//!
//! Every handler matches one disjoint variant/condition combination, since
//! the chain runs all of them for every event. Outbound failures propagate
//! as errors and are logged by the chain; the originating envelope is still
//! retired as "attempted".

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pont_events::{
    BridgeEvent, CommentCreated, CommentRef, EventHandler, IssueCreated, TrackerRef,
};
use pont_github::GithubClient;
use pont_telegram::{escape_markdown_v2, OutgoingMessage, TelegramClient};

use crate::correlation::CorrelationDirectory;

/// Mirrors newly opened tracker issues into the chat.
pub struct IssueMirrorHandler {
    telegram: Arc<TelegramClient>,
    directory: Arc<CorrelationDirectory>,
    chat_id: i64,
}

impl IssueMirrorHandler {
    pub fn new(
        telegram: Arc<TelegramClient>,
        directory: Arc<CorrelationDirectory>,
        chat_id: i64,
    ) -> Self {
        Self {
            telegram,
            directory,
            chat_id,
        }
    }
}

#[async_trait]
impl EventHandler for IssueMirrorHandler {
    fn name(&self) -> &'static str {
        "issue_mirror"
    }

    async fn handle(&self, event: &BridgeEvent) -> Result<bool> {
        let BridgeEvent::IssueCreated(issue) = event else {
            return Ok(false);
        };

        let text = render_issue_message(issue);
        let sent = self
            .telegram
            .send_message(&OutgoingMessage::markdown(self.chat_id, text))
            .await
            .context("failed to mirror issue to chat")?;
        self.directory
            .record_outgoing_mirror(sent.message_id, TrackerRef::Issue(issue.issue.clone()));
        tracing::info!(
            issue = issue.issue.number,
            chat_message_id = sent.message_id,
            "mirrored new issue to chat"
        );
        Ok(true)
    }
}

/// Mirrors tracker comments into the chat, dropping the bridge's own
/// echoes.
pub struct CommentMirrorHandler {
    telegram: Arc<TelegramClient>,
    directory: Arc<CorrelationDirectory>,
    chat_id: i64,
}

impl CommentMirrorHandler {
    pub fn new(
        telegram: Arc<TelegramClient>,
        directory: Arc<CorrelationDirectory>,
        chat_id: i64,
    ) -> Self {
        Self {
            telegram,
            directory,
            chat_id,
        }
    }
}

#[async_trait]
impl EventHandler for CommentMirrorHandler {
    fn name(&self) -> &'static str {
        "comment_mirror"
    }

    async fn handle(&self, event: &BridgeEvent) -> Result<bool> {
        let BridgeEvent::CommentCreated(comment) = event else {
            return Ok(false);
        };

        if self.directory.is_suppressed(comment.comment_id) {
            // This comment was created by the bridge for a chat reply;
            // mirroring it back would echo forever.
            tracing::info!(
                comment_id = comment.comment_id,
                "dropping echo of bridge-authored comment"
            );
            return Ok(true);
        }

        let text = render_comment_message(comment);
        let sent = self
            .telegram
            .send_message(&OutgoingMessage::markdown(self.chat_id, text))
            .await
            .context("failed to mirror comment to chat")?;
        self.directory.record_outgoing_mirror(
            sent.message_id,
            TrackerRef::Comment(CommentRef {
                comment_id: comment.comment_id,
                issue: comment.issue.clone(),
                body: comment.body.clone(),
            }),
        );
        tracing::info!(
            comment_id = comment.comment_id,
            chat_message_id = sent.message_id,
            "mirrored comment to chat"
        );
        Ok(true)
    }
}

/// Turns chat replies to mirrored messages into tracker comments.
pub struct ReplyToCommentHandler {
    github: Arc<GithubClient>,
    directory: Arc<CorrelationDirectory>,
}

impl ReplyToCommentHandler {
    pub fn new(github: Arc<GithubClient>, directory: Arc<CorrelationDirectory>) -> Self {
        Self { github, directory }
    }
}

#[async_trait]
impl EventHandler for ReplyToCommentHandler {
    fn name(&self) -> &'static str {
        "reply_to_comment"
    }

    async fn handle(&self, event: &BridgeEvent) -> Result<bool> {
        let BridgeEvent::ChatMessage(message) = event else {
            return Ok(false);
        };
        let Some(replied_to) = message.reply_to_message_id else {
            return Ok(false);
        };
        // Bot commands belong to the command handlers, not the tracker.
        if message.text.starts_with('/') {
            return Ok(false);
        }
        // One hop only: resolve the immediately referenced message.
        let Some(target) = self.directory.resolve_reply_target(replied_to) else {
            return Ok(false);
        };

        let body = render_reply_comment(&target, &message.sender, &message.text);
        let issue = target.issue();
        let comment_id = self
            .github
            .create_issue_comment(&issue.owner, &issue.repo, issue.number, &body)
            .await
            .context("failed to post chat reply as tracker comment")?;
        self.directory
            .record_suppressed_comment(comment_id, message.message_id);
        tracing::info!(
            issue = issue.number,
            comment_id,
            chat_message_id = message.message_id,
            "threaded chat reply onto tracker issue"
        );
        Ok(true)
    }
}

/// Replies to the `/noup` command with the channel bumping policy.
pub struct NoBumpingHandler {
    telegram: Arc<TelegramClient>,
    bot_username: String,
}

impl NoBumpingHandler {
    pub fn new(telegram: Arc<TelegramClient>, bot_username: impl Into<String>) -> Self {
        Self {
            telegram,
            bot_username: bot_username.into(),
        }
    }
}

#[async_trait]
impl EventHandler for NoBumpingHandler {
    fn name(&self) -> &'static str {
        "no_bumping"
    }

    async fn handle(&self, event: &BridgeEvent) -> Result<bool> {
        let BridgeEvent::ChatMessage(message) = event else {
            return Ok(false);
        };
        if message.text != format!("/noup@{}", self.bot_username) {
            return Ok(false);
        }

        let outgoing = match message.reply_to_message_id {
            Some(bumped) => OutgoingMessage::plain(
                message.chat_id,
                format!("@{} Please do not bump!", message.sender),
            )
            .in_reply_to(bumped),
            None => OutgoingMessage::plain(message.chat_id, "Please do not bump!".to_string()),
        };
        self.telegram
            .send_message(&outgoing)
            .await
            .context("failed to send bumping policy reply")?;
        Ok(true)
    }
}

fn render_issue_message(issue: &IssueCreated) -> String {
    format!(
        "New issue: \\#{} [{}]({}) by [{}](https://github.com/{})\nDescription:\n{}",
        issue.issue.number,
        escape_markdown_v2(&issue.issue.title),
        issue.issue.url,
        escape_markdown_v2(&issue.author),
        issue.author,
        escape_markdown_v2(&issue.body),
    )
}

fn render_comment_message(comment: &CommentCreated) -> String {
    format!(
        "Comment on \\#{} [{}]({}) by [{}](https://github.com/{}):\n{}",
        comment.issue.number,
        escape_markdown_v2(&comment.issue.title),
        comment.issue.url,
        escape_markdown_v2(&comment.author),
        comment.author,
        escape_markdown_v2(&comment.body),
    )
}

fn render_reply_comment(target: &TrackerRef, sender: &str, text: &str) -> String {
    match target {
        TrackerRef::Issue(_) => format!("{sender} replies:\n{text}"),
        TrackerRef::Comment(comment) => {
            format!(
                "{}\n\n{sender} replies:\n{text}",
                quote_lines(&comment.body)
            )
        }
    }
}

fn quote_lines(text: &str) -> String {
    if text.is_empty() {
        return "> ".to_string();
    }
    text.lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use pont_events::IssueRef;

    use super::*;

    fn issue_ref() -> IssueRef {
        IssueRef {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            number: 7,
            url: "https://github.com/acme/widgets/issues/7".to_string(),
            title: "Crash on start".to_string(),
        }
    }

    #[test]
    fn unit_issue_message_escapes_markdown_in_title_and_body() {
        let rendered = render_issue_message(&IssueCreated {
            issue: IssueRef {
                title: "Crash! (v1.2)".to_string(),
                ..issue_ref()
            },
            body: "steps_to_reproduce".to_string(),
            author: "alice".to_string(),
        });
        assert!(rendered.starts_with("New issue: \\#7 [Crash\\! \\(v1\\.2\\)]"));
        assert!(rendered.contains("by [alice](https://github.com/alice)"));
        assert!(rendered.ends_with("Description:\nsteps\\_to\\_reproduce"));
    }

    #[test]
    fn unit_comment_message_names_the_issue_and_sender() {
        let rendered = render_comment_message(&CommentCreated {
            comment_id: 555,
            comment_url: "https://github.com/acme/widgets/issues/7#issuecomment-555".to_string(),
            body: "Me too.".to_string(),
            author: "bob".to_string(),
            issue: issue_ref(),
        });
        assert!(rendered.starts_with("Comment on \\#7 [Crash on start]"));
        assert!(rendered.contains("by [bob](https://github.com/bob)"));
        assert!(rendered.ends_with(":\nMe too\\."));
    }

    #[test]
    fn unit_reply_to_issue_mirror_uses_plain_attribution() {
        let body = render_reply_comment(&TrackerRef::Issue(issue_ref()), "alice", "hello");
        assert_eq!(body, "alice replies:\nhello");
    }

    #[test]
    fn unit_reply_to_comment_mirror_quotes_every_line() {
        let target = TrackerRef::Comment(CommentRef {
            comment_id: 555,
            issue: issue_ref(),
            body: "first line\nsecond line".to_string(),
        });
        let body = render_reply_comment(&target, "alice", "agreed");
        assert_eq!(
            body,
            "> first line\n> second line\n\nalice replies:\nagreed"
        );
    }

    #[test]
    fn regression_empty_quoted_comment_still_renders_a_quote_marker() {
        let target = TrackerRef::Comment(CommentRef {
            comment_id: 555,
            issue: issue_ref(),
            body: String::new(),
        });
        let body = render_reply_comment(&target, "alice", "ping");
        assert_eq!(body, "> \n\nalice replies:\nping");
    }
}
