//! Inbound webhooks: authentication, kind vocabulary and typed payloads.

pub mod events;
pub mod kind;
pub mod parser;
pub mod signature;

pub use events::{
    CommentAction, GenericComment, Issue, IssueCommentHook, PrAction, PrChanges, PrCommentHook,
    PullRequestHook, PushCommit, PushHook, StatusHook, Webhook,
};
pub use kind::{UnknownKind, WebhookKind};
pub use parser::{ParseError, parse_webhook};
pub use signature::{SIGNATURE_HEADER, sign, verify_signature};
