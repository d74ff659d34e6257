//! Decoding of GitHub webhook deliveries into bridge events.
//!
//! Only `issues`/`opened` and `issue_comment`/`created` produce events;
//! every other event name or action decodes to nothing, which is not an
//! error (GitHub sends many event types per hook registration).

use anyhow::{Context, Result};
use pont_events::{BridgeEvent, CommentCreated, IssueCreated, IssueRef};
use serde::Deserialize;

/// Header carrying the event name on every GitHub delivery.
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Deserialize)]
struct IssuesPayload {
    action: String,
    issue: IssuePayload,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    action: String,
    issue: IssuePayload,
    comment: CommentPayload,
    repository: RepositoryPayload,
    sender: UserPayload,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    number: u64,
    html_url: String,
    title: String,
    #[serde(default)]
    body: Option<String>,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    id: u64,
    html_url: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: UserPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

fn issue_ref(issue: &IssuePayload, repository: &RepositoryPayload) -> IssueRef {
    IssueRef {
        owner: repository.owner.login.clone(),
        repo: repository.name.clone(),
        number: issue.number,
        url: issue.html_url.clone(),
        title: issue.title.clone(),
    }
}

/// Decodes one webhook delivery into the events it carries.
pub fn decode_webhook_events(event_name: &str, body: &str) -> Result<Vec<BridgeEvent>> {
    match event_name {
        "issues" => {
            let payload: IssuesPayload =
                serde_json::from_str(body).context("failed to decode issues payload")?;
            if payload.action != "opened" {
                return Ok(Vec::new());
            }
            Ok(vec![BridgeEvent::IssueCreated(IssueCreated {
                issue: issue_ref(&payload.issue, &payload.repository),
                body: payload.issue.body.unwrap_or_default(),
                author: payload.issue.user.login,
            })])
        }
        "issue_comment" => {
            let payload: IssueCommentPayload =
                serde_json::from_str(body).context("failed to decode issue_comment payload")?;
            if payload.action != "created" {
                return Ok(Vec::new());
            }
            Ok(vec![BridgeEvent::CommentCreated(CommentCreated {
                comment_id: payload.comment.id,
                comment_url: payload.comment.html_url,
                body: payload.comment.body.unwrap_or_default(),
                author: payload.sender.login,
                issue: issue_ref(&payload.issue, &payload.repository),
            })])
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUE_OPENED: &str = r#"{
        "action": "opened",
        "issue": {
            "number": 7,
            "html_url": "https://github.com/acme/widgets/issues/7",
            "title": "Crash on start",
            "body": "It crashes.",
            "user": { "login": "alice" }
        },
        "repository": { "name": "widgets", "owner": { "login": "acme" } }
    }"#;

    const COMMENT_CREATED: &str = r#"{
        "action": "created",
        "issue": {
            "number": 7,
            "html_url": "https://github.com/acme/widgets/issues/7",
            "title": "Crash on start",
            "body": "It crashes.",
            "user": { "login": "alice" }
        },
        "comment": {
            "id": 555,
            "html_url": "https://github.com/acme/widgets/issues/7#issuecomment-555",
            "body": "Me too."
        },
        "repository": { "name": "widgets", "owner": { "login": "acme" } },
        "sender": { "login": "bob" }
    }"#;

    #[test]
    fn unit_decodes_opened_issue_into_issue_created() {
        let events = decode_webhook_events("issues", ISSUE_OPENED).expect("decode");
        assert_eq!(events.len(), 1);
        let BridgeEvent::IssueCreated(issue) = &events[0] else {
            panic!("expected issue_created, got {}", events[0].kind());
        };
        assert_eq!(issue.issue.owner, "acme");
        assert_eq!(issue.issue.repo, "widgets");
        assert_eq!(issue.issue.number, 7);
        assert_eq!(issue.author, "alice");
        assert_eq!(issue.body, "It crashes.");
    }

    #[test]
    fn unit_decodes_created_comment_into_comment_created() {
        let events = decode_webhook_events("issue_comment", COMMENT_CREATED).expect("decode");
        assert_eq!(events.len(), 1);
        let BridgeEvent::CommentCreated(comment) = &events[0] else {
            panic!("expected comment_created, got {}", events[0].kind());
        };
        assert_eq!(comment.comment_id, 555);
        assert_eq!(comment.author, "bob");
        assert_eq!(comment.issue.number, 7);
        assert_eq!(comment.body, "Me too.");
    }

    #[test]
    fn unit_other_actions_and_events_decode_to_nothing() {
        let edited = ISSUE_OPENED.replace("\"opened\"", "\"edited\"");
        assert!(decode_webhook_events("issues", &edited)
            .expect("decode")
            .is_empty());

        let deleted = COMMENT_CREATED.replace("\"created\"", "\"deleted\"");
        assert!(decode_webhook_events("issue_comment", &deleted)
            .expect("decode")
            .is_empty());

        assert!(decode_webhook_events("push", "{}").expect("decode").is_empty());
    }

    #[test]
    fn regression_null_issue_body_decodes_to_empty_string() {
        let payload = ISSUE_OPENED.replace("\"It crashes.\"", "null");
        let events = decode_webhook_events("issues", &payload).expect("decode");
        let BridgeEvent::IssueCreated(issue) = &events[0] else {
            panic!("expected issue_created");
        };
        assert_eq!(issue.body, "");
    }

    #[test]
    fn regression_malformed_payload_is_an_error() {
        assert!(decode_webhook_events("issues", "not json").is_err());
    }
}
