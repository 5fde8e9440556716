//! Records exchanged with the forum API.
//!
//! Each record is created from exactly one successful response and is
//! read-only afterward. Later stages reference records (an author, a post)
//! but never own or mutate them.
//!
//! # Wire format
//!
//! All bodies are JSON. IDs travel as decimal strings. List endpoints return a
//! [`Page`] whose items may carry extra fields (`created_at`, `reply_num`, ...);
//! unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};

use crate::types::{Cursor, PostId, ReplyId, UserId};

/// A registered user, as returned by register and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Server-assigned user ID.
    pub user_id: UserId,
    /// Login name (unique).
    pub username: String,
    /// Display name.
    pub nickname: String,
    /// Token sent in the `Auth` header on authenticated calls.
    pub auth_token: String,
}

/// A created post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    /// Server-assigned post ID.
    pub post_id: PostId,
    /// Author of the post.
    pub author_id: UserId,
    /// Post title.
    pub title: String,
    /// Post body.
    pub content: String,
}

/// A reply to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRecord {
    /// Server-assigned reply ID.
    pub reply_id: ReplyId,
    /// Author of the reply.
    pub author_id: UserId,
    /// Post being replied to.
    pub post_id: PostId,
    /// Reply body.
    pub content: String,
}

/// A reply as it appears in the reply list endpoint (no `post_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedReply {
    /// Server-assigned reply ID.
    pub reply_id: ReplyId,
    /// Author of the reply.
    pub author_id: UserId,
    /// Reply body.
    pub content: String,
}

impl From<&ReplyRecord> for ListedReply {
    fn from(reply: &ReplyRecord) -> Self {
        Self {
            reply_id: reply.reply_id,
            author_id: reply.author_id,
            content: reply.content.clone(),
        }
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Continuation token for the next page.
    #[serde(default)]
    pub cursor: Cursor,
    /// Records on this page, most recent first.
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

impl<T> Page<T> {
    /// Creates a page.
    #[must_use]
    pub const fn new(cursor: Cursor, list: Vec<T>) -> Self {
        Self { cursor, list }
    }

    /// Creates an empty page (no more entries).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            cursor: Cursor::start(),
            list: Vec::new(),
        }
    }

    /// Returns true if the page holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
