//! In-memory forum server for end-to-end tests.
//!
//! [`SimulatedForum`] implements [`ApiExecutor`] directly, so the whole
//! workload pipeline (generator, dispatcher, orchestrator, verifier) runs
//! without sockets. Behavior follows the real server:
//!
//! - Usernames are unique; a duplicate is rejected with ecode `3001`.
//! - IDs are assigned from monotonic counters and travel as decimal strings.
//! - Lists are most-recent-first, paged by an opaque cursor, and an exhausted
//!   list is reported with ecode `3004`.
//! - A post's reply time starts at its creation time and moves forward on
//!   every reply.
//!
//! # Fault Injection
//!
//! A [`FaultPlan`] can reject every n-th call to an endpoint, add latency,
//! stall an endpoint past any timeout, or corrupt list pages so that the
//! ordering checks have something to catch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use hoyobar_core::{PostId, ReplyId, UserId};
use hoyobar_workload::{ApiExecutor, Endpoint, ExecutorError, RequestDescriptor, Timestamp};

/// Page size used when a list query does not carry one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Largest page the server returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// HTTP status the server uses for every error response.
const ERROR_STATUS: u16 = 500;

/// How long a stalled call sleeps. Far beyond any test timeout.
const STALL: Duration = Duration::from_secs(3600);

/// Faults injected by the simulated server.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Reject every n-th call (1-based) to the endpoint before any state change.
    pub reject_every: Option<(Endpoint, u64)>,
    /// Latency added to every call.
    pub latency: Duration,
    /// Calls to this endpoint never answer.
    pub stall: Option<Endpoint>,
    /// Swap the first two entries of every list page.
    pub misorder_lists: bool,
    /// Omit the last entry of every list.
    pub truncate_lists: bool,
    /// Answer login with a different nickname than registered.
    pub corrupt_login: bool,
}

#[derive(Debug)]
struct StoredUser {
    user_id: UserId,
    username: String,
    password: String,
    nickname: String,
    auth_token: String,
}

#[derive(Debug)]
struct StoredPost {
    post_id: PostId,
    author_id: UserId,
    title: String,
    content: String,
    created_seq: u64,
    reply_seq: u64,
    reply_num: u64,
}

#[derive(Debug)]
struct StoredReply {
    reply_id: ReplyId,
    author_id: UserId,
    post_id: PostId,
    content: String,
    seq: u64,
}

#[derive(Debug, Default)]
struct ForumState {
    users: Vec<StoredUser>,
    by_username: HashMap<String, usize>,
    by_token: HashMap<String, usize>,
    posts: Vec<StoredPost>,
    replies: Vec<StoredReply>,
    /// Logical clock shared by posts and replies.
    seq: u64,
}

impl ForumState {
    fn tick(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn post_index(&self, post_id: PostId) -> Option<usize> {
        let index = usize::try_from(post_id.get()).ok()?.checked_sub(1)?;
        (index < self.posts.len()).then_some(index)
    }
}

/// Per-endpoint call counters.
#[derive(Debug, Default)]
struct EndpointCalls {
    register: AtomicU64,
    login: AtomicU64,
    create_post: AtomicU64,
    reply: AtomicU64,
    post_list: AtomicU64,
    reply_list: AtomicU64,
}

impl EndpointCalls {
    const fn counter(&self, endpoint: Endpoint) -> &AtomicU64 {
        match endpoint {
            Endpoint::Register => &self.register,
            Endpoint::Login => &self.login,
            Endpoint::CreatePost => &self.create_post,
            Endpoint::Reply => &self.reply,
            Endpoint::PostList => &self.post_list,
            Endpoint::ReplyList => &self.reply_list,
        }
    }
}

/// In-memory forum server.
#[derive(Debug)]
pub struct SimulatedForum {
    state: Mutex<ForumState>,
    faults: FaultPlan,
    calls: EndpointCalls,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    start_time: Instant,
}

impl Default for SimulatedForum {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight gauge when a call finishes or is cancelled.
struct CallGuard<'a>(&'a AtomicU64);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn error(ecode: &str, emsg: &str) -> ExecutorError {
    ExecutorError::application(ERROR_STATUS, ecode, emsg)
}

fn not_logged_in() -> ExecutorError {
    error("2002", "not logged in")
}

fn bad_request(emsg: &str) -> ExecutorError {
    error("1000", emsg)
}

fn no_more_entries() -> ExecutorError {
    error("3004", "no more entries")
}

fn str_field<'d>(descriptor: &'d RequestDescriptor, field: &str) -> Result<&'d str, ExecutorError> {
    descriptor
        .payload_str(field)
        .ok_or_else(|| bad_request(&format!("missing field '{field}'")))
}

fn id_field(descriptor: &RequestDescriptor, field: &str) -> Result<u64, ExecutorError> {
    str_field(descriptor, field)?
        .parse()
        .map_err(|_| bad_request(&format!("invalid id in '{field}'")))
}

/// Reads cursor and page size. The cursor is the sort key of the last entry
/// already returned; the empty cursor starts at the top.
fn page_params(descriptor: &RequestDescriptor) -> Result<(Option<u64>, usize), ExecutorError> {
    let cursor = match descriptor.payload_str("cursor").unwrap_or_default() {
        "" => None,
        token => Some(token.parse().map_err(|_| bad_request("invalid cursor"))?),
    };
    let page_size = match descriptor.payload_str("page_size") {
        None | Some("") => DEFAULT_PAGE_SIZE,
        Some(size) => size
            .parse::<usize>()
            .map_err(|_| bad_request("invalid page size"))?
            .clamp(1, MAX_PAGE_SIZE),
    };
    Ok((cursor, page_size))
}

impl SimulatedForum {
    /// Creates a fault-free server.
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default())
    }

    /// Creates a server that injects `faults`.
    #[must_use]
    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            state: Mutex::new(ForumState::default()),
            faults,
            calls: EndpointCalls::default(),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Registered users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").users.len()
    }

    /// Created posts.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").posts.len()
    }

    /// Created replies.
    #[must_use]
    pub fn reply_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").replies.len()
    }

    /// Calls received by `endpoint`, including rejected ones.
    #[must_use]
    pub fn calls(&self, endpoint: Endpoint) -> u64 {
        self.calls.counter(endpoint).load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in progress at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Calls currently in progress.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self) -> CallGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        CallGuard(&self.in_flight)
    }

    fn handle(&self, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let mut state = self.state.lock().expect("lock poisoned");
        match descriptor.endpoint() {
            Endpoint::Register => Self::register(&mut state, descriptor),
            Endpoint::Login => self.login(&state, descriptor),
            Endpoint::CreatePost => Self::create_post(&mut state, descriptor),
            Endpoint::Reply => Self::reply(&mut state, descriptor),
            Endpoint::PostList => self.post_list(&state, descriptor),
            Endpoint::ReplyList => self.reply_list(&state, descriptor),
        }
    }

    fn register(state: &mut ForumState, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let username = str_field(descriptor, "username")?;
        if state.by_username.contains_key(username) {
            return Err(error("3001", "user already exists"));
        }

        let index = state.users.len();
        let user_id = UserId::new(index as u64 + 1);
        let user = StoredUser {
            user_id,
            username: username.to_string(),
            password: str_field(descriptor, "password")?.to_string(),
            nickname: str_field(descriptor, "nickname")?.to_string(),
            auth_token: format!("token-{}", user_id.get()),
        };
        let body = json!({
            "user_id": user.user_id.to_wire(),
            "username": user.username,
            "nickname": user.nickname,
            "auth_token": user.auth_token,
        });
        state.by_username.insert(user.username.clone(), index);
        state.by_token.insert(user.auth_token.clone(), index);
        state.users.push(user);
        Ok(body)
    }

    fn login(&self, state: &ForumState, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let username = str_field(descriptor, "username")?;
        let password = str_field(descriptor, "password")?;
        let user = state
            .by_username
            .get(username)
            .map(|&index| &state.users[index])
            .filter(|user| user.password == password)
            .ok_or_else(|| error("2001", "wrong username or password"))?;

        let nickname = if self.faults.corrupt_login {
            format!("{}-x", user.nickname)
        } else {
            user.nickname.clone()
        };
        Ok(json!({
            "user_id": user.user_id.to_wire(),
            "username": user.username,
            "nickname": nickname,
            "auth_token": user.auth_token,
        }))
    }

    fn authenticate(state: &ForumState, descriptor: &RequestDescriptor) -> Result<UserId, ExecutorError> {
        let token = descriptor.auth_token().ok_or_else(not_logged_in)?;
        let index = state.by_token.get(token).ok_or_else(not_logged_in)?;
        let author = state.users[*index].user_id;
        if id_field(descriptor, "author_id")? != author.get() {
            return Err(error("2000", "author does not match token"));
        }
        Ok(author)
    }

    fn create_post(state: &mut ForumState, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let author_id = Self::authenticate(state, descriptor)?;
        let title = str_field(descriptor, "title")?.to_string();
        let content = str_field(descriptor, "content")?.to_string();

        let seq = state.tick();
        let post_id = PostId::new(state.posts.len() as u64 + 1);
        state.posts.push(StoredPost {
            post_id,
            author_id,
            title,
            content,
            created_seq: seq,
            reply_seq: seq,
            reply_num: 0,
        });
        Ok(json!({ "post_id": post_id.to_wire() }))
    }

    fn reply(state: &mut ForumState, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let author_id = Self::authenticate(state, descriptor)?;
        let post_id = PostId::new(id_field(descriptor, "post_id")?);
        let index = state
            .post_index(post_id)
            .ok_or_else(|| error("3003", "post not found"))?;
        let content = str_field(descriptor, "content")?.to_string();

        let seq = state.tick();
        let reply_id = ReplyId::new(state.replies.len() as u64 + 1);
        state.replies.push(StoredReply {
            reply_id,
            author_id,
            post_id,
            content,
            seq,
        });
        let post = &mut state.posts[index];
        post.reply_seq = seq;
        post.reply_num += 1;
        Ok(json!({ "reply_id": reply_id.to_wire() }))
    }

    /// Cuts one page out of `entries`, which must be sorted by key descending.
    fn page<T>(
        &self,
        mut entries: Vec<(u64, T)>,
        cursor: Option<u64>,
        page_size: usize,
        render: impl Fn(&T) -> Value,
    ) -> Result<Value, ExecutorError> {
        if self.faults.truncate_lists {
            entries.pop();
        }
        let mut page: Vec<(u64, T)> = entries
            .into_iter()
            .filter(|(key, _)| cursor.map_or(true, |after| *key < after))
            .take(page_size)
            .collect();
        let Some(&(last_key, _)) = page.last() else {
            return Err(no_more_entries());
        };
        if self.faults.misorder_lists && page.len() >= 2 {
            page.swap(0, 1);
        }
        let list: Vec<Value> = page.iter().map(|(_, entry)| render(entry)).collect();
        Ok(json!({ "cursor": last_key.to_string(), "list": list }))
    }

    fn post_list(&self, state: &ForumState, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let (cursor, page_size) = page_params(descriptor)?;
        let by_reply_time = match descriptor.payload_str("order").unwrap_or("create_time") {
            "create_time" => false,
            "reply_time" => true,
            _ => return Err(bad_request("invalid order")),
        };

        let mut entries: Vec<(u64, &StoredPost)> = state
            .posts
            .iter()
            .map(|post| {
                let key = if by_reply_time { post.reply_seq } else { post.created_seq };
                (key, post)
            })
            .collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        self.page(entries, cursor, page_size, |post| {
            json!({
                "post_id": post.post_id.to_wire(),
                "author_id": post.author_id.to_wire(),
                "title": post.title,
                "content": post.content,
                "reply_num": post.reply_num,
            })
        })
    }

    fn reply_list(&self, state: &ForumState, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let post_id = PostId::new(id_field(descriptor, "post_id")?);
        if state.post_index(post_id).is_none() {
            return Err(error("3003", "post not found"));
        }
        let (cursor, page_size) = page_params(descriptor)?;

        let mut entries: Vec<(u64, &StoredReply)> = state
            .replies
            .iter()
            .filter(|reply| reply.post_id == post_id)
            .map(|reply| (reply.seq, reply))
            .collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        self.page(entries, cursor, page_size, |reply| {
            json!({
                "reply_id": reply.reply_id.to_wire(),
                "author_id": reply.author_id.to_wire(),
                "content": reply.content,
            })
        })
    }
}

impl ApiExecutor for SimulatedForum {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> Timestamp {
        self.start_time.elapsed().as_micros() as u64
    }

    async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let _guard = self.begin();
        let endpoint = descriptor.endpoint();
        let call = self.calls.counter(endpoint).fetch_add(1, Ordering::SeqCst) + 1;

        if !self.faults.latency.is_zero() {
            tokio::time::sleep(self.faults.latency).await;
        }
        if self.faults.stall == Some(endpoint) {
            tokio::time::sleep(STALL).await;
        }
        if let Some((target, every)) = self.faults.reject_every {
            if target == endpoint && every > 0 && call % every == 0 {
                tracing::trace!(endpoint = endpoint.path(), call, "injected rejection");
                return Err(error("3000", "injected failure"));
            }
        }

        self.handle(descriptor)
    }
}
