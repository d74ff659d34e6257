//! Bridge runtime: webhook receiver, queue dispatcher, upstream poller,
//! correlation directory, and the mirror/reply handler chain.

mod bridge;
mod correlation;
mod dispatcher;
mod handlers;
mod poller;
mod receiver;

pub use bridge::{run_bridge, BridgeConfig};
pub use correlation::CorrelationDirectory;
pub use dispatcher::{GithubWebhookRoute, QueueDispatcher, WebhookRoute};
pub use handlers::{
    CommentMirrorHandler, IssueMirrorHandler, NoBumpingHandler, ReplyToCommentHandler,
};
pub use poller::TelegramPoller;
pub use receiver::{build_webhook_router, WebhookReceiverState};
