//! Ordering verification against paginated list endpoints.
//!
//! Checks that the server returns created records most-recent-first, in the
//! order the client issued them:
//! - Post list by creation time
//! - Reply list per post
//! - Post list by reply time, after replying to the oldest post
//!
//! Every check is fatal on the first divergence and reports both the expected
//! and the observed record.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use hoyobar_core::{Cursor, ListedReply, Page, PostId, PostRecord, UserRecord};

use crate::descriptor::{Endpoint, Fields, RequestDescriptor};
use crate::executor::{ApiExecutor, ExecutorError};
use crate::generator::fields;

/// Sort order of the post list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    /// Newest post first.
    CreateTime,
    /// Most recently replied (or created) post first.
    ReplyTime,
}

impl ListOrder {
    /// Query parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateTime => "create_time",
            Self::ReplyTime => "reply_time",
        }
    }
}

/// A verification failure. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A listed record differs from the expected one.
    FieldMismatch {
        /// Which list was being checked.
        list: String,
        /// Zero-based position in the most-recent-first sequence.
        position: usize,
        /// First differing field.
        field: &'static str,
        /// Expected record.
        expected: String,
        /// Observed record.
        actual: String,
    },

    /// The server returned more or fewer records than expected.
    CountMismatch {
        /// Which list was being checked.
        list: String,
        /// Number of records expected.
        expected: usize,
        /// Number of records the server returned before the check stopped.
        actual: usize,
    },

    /// The post just replied to is not first in reply-time order.
    ReplyRecencyMismatch {
        /// Post that was replied to.
        expected: PostId,
        /// Post listed first, if any.
        actual: Option<PostId>,
    },

    /// A login response disagrees with the registered user.
    LoginMismatch {
        /// Username that logged in.
        username: String,
        /// Differing field.
        field: &'static str,
        /// Expected value.
        expected: String,
        /// Observed value.
        actual: String,
    },

    /// A list page could not be fetched.
    FetchFailed {
        /// Which list was being checked.
        list: String,
        /// One-based page number.
        page: u64,
        /// Underlying error.
        cause: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldMismatch {
                list,
                position,
                field,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Field mismatch in {list} at position {position}: field '{field}' differs\n  \
                     expected: {expected}\n  actual:   {actual}"
                )
            }
            Self::CountMismatch {
                list,
                expected,
                actual,
            } => {
                write!(f, "Count mismatch in {list}: expected {expected} records, server returned {actual}")
            }
            Self::ReplyRecencyMismatch { expected, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "Reply recency mismatch: replied to {expected}, but {actual} is listed first by reply time"
                ),
                None => write!(
                    f,
                    "Reply recency mismatch: replied to {expected}, but the reply-time list is empty"
                ),
            },
            Self::LoginMismatch {
                username,
                field,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Login mismatch for '{username}': field '{field}' expected {expected:?}, got {actual:?}"
                )
            }
            Self::FetchFailed { list, page, cause } => {
                write!(f, "Failed to fetch page {page} of {list}: {cause}")
            }
        }
    }
}

impl std::error::Error for Violation {}

/// A record returned by a list endpoint.
pub trait ListedRecord: fmt::Debug + DeserializeOwned {
    /// Returns the first field that differs from `actual`, in wire order.
    fn mismatched_field(&self, actual: &Self) -> Option<&'static str>;
}

impl ListedRecord for PostRecord {
    fn mismatched_field(&self, actual: &Self) -> Option<&'static str> {
        if self.post_id != actual.post_id {
            Some("post_id")
        } else if self.author_id != actual.author_id {
            Some("author_id")
        } else if self.title != actual.title {
            Some("title")
        } else if self.content != actual.content {
            Some("content")
        } else {
            None
        }
    }
}

impl ListedRecord for ListedReply {
    fn mismatched_field(&self, actual: &Self) -> Option<&'static str> {
        if self.reply_id != actual.reply_id {
            Some("reply_id")
        } else if self.author_id != actual.author_id {
            Some("author_id")
        } else if self.content != actual.content {
            Some("content")
        } else {
            None
        }
    }
}

/// Source of list pages.
#[allow(async_fn_in_trait)]
pub trait PageFetcher {
    /// Record type on each page.
    type Item: ListedRecord;

    /// Name of the list, used in reports.
    fn describe(&self) -> String;

    /// Fetches the page after `cursor`. An exhausted list yields an empty page.
    async fn fetch(&mut self, cursor: &Cursor) -> Result<Page<Self::Item>, ExecutorError>;
}

/// Executes one list query with a timeout.
///
/// The "no more entries" error code is mapped to an empty page.
async fn fetch_page<E: ApiExecutor, T: DeserializeOwned>(
    executor: &E,
    descriptor: &RequestDescriptor,
    timeout: Duration,
) -> Result<Page<T>, ExecutorError> {
    match tokio::time::timeout(timeout, executor.execute(descriptor)).await {
        Err(_) => Err(ExecutorError::Timeout(timeout)),
        Ok(Err(err)) if err.is_no_more_entries() => Ok(Page::empty()),
        Ok(Err(err)) => Err(err),
        Ok(Ok(body)) => serde_json::from_value(body).map_err(|e| ExecutorError::Malformed(e.to_string())),
    }
}

fn list_query(endpoint: Endpoint, mut params: Fields, cursor: &Cursor, page_size: Option<u32>) -> RequestDescriptor {
    params.insert("cursor".to_string(), Value::from(cursor.as_str()));
    if let Some(size) = page_size {
        params.insert("page_size".to_string(), Value::from(size.to_string()));
    }
    RequestDescriptor::new(0, endpoint, params)
}

/// Fetches pages of `GET /post/list`.
#[derive(Debug)]
pub struct PostListFetcher<'a, E> {
    executor: &'a E,
    order: ListOrder,
    page_size: Option<u32>,
    timeout: Duration,
}

impl<'a, E: ApiExecutor> PostListFetcher<'a, E> {
    /// Creates a fetcher. `page_size` of `None` uses the server default.
    #[must_use]
    pub const fn new(executor: &'a E, order: ListOrder, page_size: Option<u32>, timeout: Duration) -> Self {
        Self {
            executor,
            order,
            page_size,
            timeout,
        }
    }
}

impl<E: ApiExecutor> PageFetcher for PostListFetcher<'_, E> {
    type Item = PostRecord;

    fn describe(&self) -> String {
        format!("post list ({})", self.order.as_str())
    }

    async fn fetch(&mut self, cursor: &Cursor) -> Result<Page<PostRecord>, ExecutorError> {
        let params = fields([("order", Value::from(self.order.as_str()))]);
        let descriptor = list_query(Endpoint::PostList, params, cursor, self.page_size);
        fetch_page(self.executor, &descriptor, self.timeout).await
    }
}

/// Fetches pages of `GET /post/reply/list` for one post.
#[derive(Debug)]
pub struct ReplyListFetcher<'a, E> {
    executor: &'a E,
    post_id: PostId,
    page_size: Option<u32>,
    timeout: Duration,
}

impl<'a, E: ApiExecutor> ReplyListFetcher<'a, E> {
    /// Creates a fetcher. `page_size` of `None` uses the server default.
    #[must_use]
    pub const fn new(executor: &'a E, post_id: PostId, page_size: Option<u32>, timeout: Duration) -> Self {
        Self {
            executor,
            post_id,
            page_size,
            timeout,
        }
    }
}

impl<E: ApiExecutor> PageFetcher for ReplyListFetcher<'_, E> {
    type Item = ListedReply;

    fn describe(&self) -> String {
        format!("reply list of {}", self.post_id)
    }

    async fn fetch(&mut self, cursor: &Cursor) -> Result<Page<ListedReply>, ExecutorError> {
        let params = fields([("post_id", Value::from(self.post_id.to_wire()))]);
        let descriptor = list_query(Endpoint::ReplyList, params, cursor, self.page_size);
        fetch_page(self.executor, &descriptor, self.timeout).await
    }
}

/// States of an ordering check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    /// Waiting for the next page.
    Fetching,
    /// Comparing a received page.
    Comparing,
    /// All expected records matched.
    Done,
    /// A mismatch was found. Terminal.
    Failed,
}

/// Outcome of a successful ordering check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Which list was checked.
    pub list: String,
    /// Pages fetched.
    pub pages: u64,
    /// Records matched.
    pub records: usize,
}

/// Incremental comparison of list pages against an expected sequence.
#[derive(Debug)]
pub struct OrderingVerifier<'e, T> {
    list: String,
    expected: &'e [T],
    position: usize,
    cursor: Cursor,
    pages: u64,
    state: VerifyState,
    violation: Option<Violation>,
}

impl<'e, T: ListedRecord> OrderingVerifier<'e, T> {
    /// Starts a check of `list` against `expected`, most recent first.
    ///
    /// An empty expectation is immediately `Done`.
    #[must_use]
    pub fn new(list: impl Into<String>, expected: &'e [T]) -> Self {
        let state = if expected.is_empty() {
            VerifyState::Done
        } else {
            VerifyState::Fetching
        };
        Self {
            list: list.into(),
            expected,
            position: 0,
            cursor: Cursor::start(),
            pages: 0,
            state,
            violation: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> VerifyState {
        self.state
    }

    /// Cursor for the next fetch.
    #[must_use]
    pub const fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Records still expected.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.expected.len() - self.position
    }

    /// Feeds a received page. Ignored unless the state is `Fetching`.
    pub fn on_page(&mut self, page: Page<T>) -> VerifyState {
        if self.state != VerifyState::Fetching {
            return self.state;
        }
        self.pages += 1;
        self.state = VerifyState::Comparing;

        if page.list.is_empty() || page.list.len() > self.remaining() {
            return self.fail(Violation::CountMismatch {
                list: self.list.clone(),
                expected: self.expected.len(),
                actual: self.position + page.list.len(),
            });
        }

        for actual in &page.list {
            let expected = &self.expected[self.position];
            if let Some(field) = expected.mismatched_field(actual) {
                return self.fail(Violation::FieldMismatch {
                    list: self.list.clone(),
                    position: self.position,
                    field,
                    expected: format!("{expected:?}"),
                    actual: format!("{actual:?}"),
                });
            }
            self.position += 1;
        }

        self.cursor = page.cursor;
        self.state = if self.remaining() == 0 {
            VerifyState::Done
        } else {
            VerifyState::Fetching
        };
        self.state
    }

    /// Records a fetch failure. Ignored unless the state is `Fetching`.
    pub fn on_fetch_error(&mut self, err: &ExecutorError) -> VerifyState {
        if self.state != VerifyState::Fetching {
            return self.state;
        }
        self.fail(Violation::FetchFailed {
            list: self.list.clone(),
            page: self.pages + 1,
            cause: err.to_string(),
        })
    }

    fn fail(&mut self, violation: Violation) -> VerifyState {
        self.violation = Some(violation);
        self.state = VerifyState::Failed;
        self.state
    }

    /// Consumes the verifier once it reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the violation if the check failed.
    pub fn finish(self) -> Result<VerifyReport, Violation> {
        match self.violation {
            Some(violation) => Err(violation),
            None => Ok(VerifyReport {
                list: self.list,
                pages: self.pages,
                records: self.position,
            }),
        }
    }
}

/// Pages through `fetcher` and compares every record with `expected`.
///
/// # Errors
///
/// Returns the first violation found.
pub async fn verify_ordering<F: PageFetcher>(
    expected_most_recent_first: &[F::Item],
    fetcher: &mut F,
) -> Result<VerifyReport, Violation> {
    let mut verifier = OrderingVerifier::new(fetcher.describe(), expected_most_recent_first);
    while verifier.state() == VerifyState::Fetching {
        let cursor = verifier.cursor().clone();
        match fetcher.fetch(&cursor).await {
            Ok(page) => verifier.on_page(page),
            Err(err) => verifier.on_fetch_error(&err),
        };
    }
    verifier.finish()
}

/// Checks that `replied` is listed first in reply-time order.
///
/// # Errors
///
/// Returns `ReplyRecencyMismatch` if another post (or nothing) is first, or
/// `FetchFailed` if the page cannot be fetched.
pub async fn verify_reply_recency<E: ApiExecutor>(
    executor: &E,
    replied: PostId,
    page_size: Option<u32>,
    timeout: Duration,
) -> Result<(), Violation> {
    let mut fetcher = PostListFetcher::new(executor, ListOrder::ReplyTime, page_size, timeout);
    let page = fetcher.fetch(&Cursor::start()).await.map_err(|err| Violation::FetchFailed {
        list: fetcher.describe(),
        page: 1,
        cause: err.to_string(),
    })?;

    let first = page.list.first().map(|post| post.post_id);
    if first == Some(replied) {
        Ok(())
    } else {
        Err(Violation::ReplyRecencyMismatch {
            expected: replied,
            actual: first,
        })
    }
}

/// Checks a login response against the registered user.
///
/// # Errors
///
/// Returns `LoginMismatch` on the first differing field or an empty token.
pub fn verify_login(registered: &UserRecord, logged_in: &UserRecord) -> Result<(), Violation> {
    let mismatch = |field: &'static str, expected: String, actual: String| Violation::LoginMismatch {
        username: registered.username.clone(),
        field,
        expected,
        actual,
    };

    if registered.user_id != logged_in.user_id {
        return Err(mismatch(
            "user_id",
            registered.user_id.to_wire(),
            logged_in.user_id.to_wire(),
        ));
    }
    if registered.username != logged_in.username {
        return Err(mismatch(
            "username",
            registered.username.clone(),
            logged_in.username.clone(),
        ));
    }
    if registered.nickname != logged_in.nickname {
        return Err(mismatch(
            "nickname",
            registered.nickname.clone(),
            logged_in.nickname.clone(),
        ));
    }
    if logged_in.auth_token.is_empty() {
        return Err(mismatch("auth_token", "<non-empty>".to_string(), String::new()));
    }
    Ok(())
}
