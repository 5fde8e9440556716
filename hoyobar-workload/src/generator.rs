//! Deterministic request generation.
//!
//! The [`TaskGenerator`] turns counts and previously created records into
//! ordered descriptor sequences. It owns the random source and is used
//! strictly before dispatch, so a given seed always yields the same sequence
//! regardless of how responses interleave.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;

use hoyobar_core::{Error, Limits, PostRecord, Result, UserRecord};

use crate::descriptor::{Endpoint, Fields, RequestDescriptor};
use crate::payload::{truncate_chars, PayloadSource, SyntheticPayloads, DEFAULT_VCODE};

/// Inclusive range of replies drawn per post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyRange {
    min: u32,
    max: u32,
}

impl ReplyRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvertedRange` if `min > max`.
    pub const fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(Error::InvertedRange {
                name: "reply_count",
                min: min as u64,
                max: max as u64,
            });
        }
        Ok(Self { min, max })
    }

    /// A range that always yields `count`.
    #[must_use]
    pub const fn exactly(count: u32) -> Self {
        Self {
            min: count,
            max: count,
        }
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(self) -> u32 {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(self) -> u32 {
        self.max
    }

    fn sample<R: Rng>(self, rng: &mut R) -> u32 {
        rng.gen_range(self.min..=self.max)
    }
}

/// Builds a JSON object from field/value pairs.
pub(crate) fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Produces descriptor sequences for each stage.
#[derive(Debug)]
pub struct TaskGenerator<P = SyntheticPayloads> {
    rng: ChaCha8Rng,
    payloads: P,
    limits: Limits,
    issued_usernames: HashSet<String>,
    passwords: HashMap<String, String>,
    next_user_index: u64,
}

impl TaskGenerator<SyntheticPayloads> {
    /// Creates a generator with synthetic payloads derived from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let limits = Limits::default();
        Self::with_payloads(seed, SyntheticPayloads::with_limits(seed.wrapping_add(1), limits), limits)
    }
}

impl<P: PayloadSource> TaskGenerator<P> {
    /// Creates a generator over a custom payload source.
    #[must_use]
    pub fn with_payloads(seed: u64, payloads: P, limits: Limits) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            payloads,
            limits,
            issued_usernames: HashSet::new(),
            passwords: HashMap::new(),
            next_user_index: 0,
        }
    }

    /// Number of usernames issued so far.
    #[must_use]
    pub fn issued_users(&self) -> u64 {
        self.next_user_index
    }

    /// Generates `count` registration descriptors.
    ///
    /// Indices continue across calls, so usernames stay unique for the
    /// lifetime of the generator.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateUsername` if the payload source repeats a
    /// username.
    pub fn register(&mut self, count: usize) -> Result<Vec<RequestDescriptor>> {
        let mut descriptors = Vec::with_capacity(count);
        for slot in 0..count {
            let index = self.next_user_index;
            self.next_user_index += 1;

            let username = self.payloads.username(index);
            if !self.issued_usernames.insert(username.clone()) {
                return Err(Error::DuplicateUsername { username, index });
            }
            let nickname = self.payloads.nickname(index);
            let password = self.payloads.password(index);
            self.passwords.insert(username.clone(), password.clone());

            let payload = fields([
                ("username", Value::from(username.clone())),
                ("password", Value::from(password)),
                ("vcode", Value::from(DEFAULT_VCODE)),
                ("nickname", Value::from(nickname.clone())),
            ]);
            let expected = fields([
                ("username", Value::from(username)),
                ("nickname", Value::from(nickname)),
            ]);
            descriptors.push(RequestDescriptor::new(slot, Endpoint::Register, payload).with_expected(expected));
        }
        Ok(descriptors)
    }

    /// Generates one login descriptor per registered user.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if a user was not registered through
    /// this generator (its password is unknown).
    pub fn login(&self, users: &[UserRecord]) -> Result<Vec<RequestDescriptor>> {
        users
            .iter()
            .enumerate()
            .map(|(slot, user)| {
                let password = self.passwords.get(&user.username).ok_or_else(|| Error::InvalidArgument {
                    name: "users",
                    reason: format!("no credentials issued for '{}'", user.username),
                })?;
                let payload = fields([
                    ("username", Value::from(user.username.clone())),
                    ("password", Value::from(password.clone())),
                ]);
                let expected = fields([
                    ("user_id", Value::from(user.user_id.to_wire())),
                    ("username", Value::from(user.username.clone())),
                    ("nickname", Value::from(user.nickname.clone())),
                ]);
                Ok(RequestDescriptor::new(slot, Endpoint::Login, payload).with_expected(expected))
            })
            .collect()
    }

    /// Generates `count` posts, each by an author drawn uniformly from `users`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `users` is empty and `count > 0`.
    pub fn create_posts(&mut self, users: &[UserRecord], count: usize) -> Result<Vec<RequestDescriptor>> {
        if count > 0 && users.is_empty() {
            return Err(Self::empty_pool("authors"));
        }
        let mut descriptors = Vec::with_capacity(count);
        for slot in 0..count {
            let Some(author) = users.choose(&mut self.rng) else {
                return Err(Self::empty_pool("authors"));
            };
            descriptors.push(self.post_descriptor(slot, author));
        }
        Ok(descriptors)
    }

    /// Generates `per_user` posts for every user, user-major.
    #[must_use]
    pub fn create_posts_per_user(&mut self, users: &[UserRecord], per_user: usize) -> Vec<RequestDescriptor> {
        let mut descriptors = Vec::with_capacity(users.len() * per_user);
        for author in users {
            for _ in 0..per_user {
                let slot = descriptors.len();
                descriptors.push(self.post_descriptor(slot, author));
            }
        }
        descriptors
    }

    /// Generates replies: for each post a count drawn from `range`, each reply
    /// by an author drawn uniformly from `users`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if any reply is drawn while `users`
    /// is empty.
    pub fn reply(
        &mut self,
        posts: &[PostRecord],
        users: &[UserRecord],
        range: ReplyRange,
    ) -> Result<Vec<RequestDescriptor>> {
        let mut descriptors = Vec::new();
        for post in posts {
            let count = range.sample(&mut self.rng);
            for _ in 0..count {
                let Some(author) = users.choose(&mut self.rng) else {
                    return Err(Self::empty_pool("repliers"));
                };
                let slot = descriptors.len();
                descriptors.push(self.reply_descriptor(slot, post, author));
            }
        }
        Ok(descriptors)
    }

    /// Generates a single reply to `post` by `author`.
    #[must_use]
    pub fn reply_once(&mut self, post: &PostRecord, author: &UserRecord) -> RequestDescriptor {
        self.reply_descriptor(0, post, author)
    }

    fn post_descriptor(&mut self, slot: usize, author: &UserRecord) -> RequestDescriptor {
        let title = truncate_chars(&self.payloads.title(), self.limits.max_title_chars as usize);
        let content = truncate_chars(&self.payloads.content(), self.limits.max_post_content_chars as usize);
        let payload = fields([
            ("author_id", Value::from(author.user_id.to_wire())),
            ("title", Value::from(title)),
            ("content", Value::from(content)),
        ]);
        RequestDescriptor::new(slot, Endpoint::CreatePost, payload.clone())
            .with_auth(author.auth_token.clone())
            .with_expected(payload)
    }

    fn reply_descriptor(&mut self, slot: usize, post: &PostRecord, author: &UserRecord) -> RequestDescriptor {
        let content = truncate_chars(&self.payloads.content(), self.limits.max_reply_content_chars as usize);
        let payload = fields([
            ("author_id", Value::from(author.user_id.to_wire())),
            ("post_id", Value::from(post.post_id.to_wire())),
            ("content", Value::from(content)),
        ]);
        RequestDescriptor::new(slot, Endpoint::Reply, payload.clone())
            .with_auth(author.auth_token.clone())
            .with_expected(payload)
    }

    fn empty_pool(name: &'static str) -> Error {
        Error::InvalidArgument {
            name,
            reason: "author pool is empty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use hoyobar_core::{PostId, UserId};

    use super::*;
    use crate::descriptor::Stage;

    fn user(id: u64) -> UserRecord {
        UserRecord {
            user_id: UserId::new(id),
            username: format!("187{id:07}"),
            nickname: format!("nick{id}"),
            auth_token: format!("token-{id}"),
        }
    }

    fn post(id: u64, author: u64) -> PostRecord {
        PostRecord {
            post_id: PostId::new(id),
            author_id: UserId::new(author),
            title: format!("title{id}"),
            content: format!("content{id}"),
        }
    }

    /// Repeats the same username for every index.
    struct ConstantNames;

    impl PayloadSource for ConstantNames {
        fn username(&mut self, _index: u64) -> String {
            "same".to_string()
        }
        fn nickname(&mut self, _index: u64) -> String {
            "nick".to_string()
        }
        fn password(&mut self, _index: u64) -> String {
            "p@ssw0rd".to_string()
        }
        fn title(&mut self) -> String {
            "t".repeat(80)
        }
        fn content(&mut self) -> String {
            "c".repeat(800)
        }
    }

    #[test]
    fn test_register_slots_and_usernames() {
        let mut generator = TaskGenerator::new(42);
        let descriptors = generator.register(3).unwrap();

        assert_eq!(descriptors.len(), 3);
        for (i, descriptor) in descriptors.iter().enumerate() {
            assert_eq!(descriptor.slot(), i);
            assert_eq!(descriptor.stage(), Stage::Register);
            assert_eq!(descriptor.payload_str("vcode"), Some("0000"));
        }
        assert_eq!(descriptors[0].payload_str("username"), Some("1870000000"));
        assert_eq!(descriptors[2].payload_str("username"), Some("1870000002"));
    }

    #[test]
    fn test_register_continues_indices() {
        let mut generator = TaskGenerator::new(42);
        generator.register(2).unwrap();
        let second = generator.register(1).unwrap();
        assert_eq!(second[0].slot(), 0);
        assert_eq!(second[0].payload_str("username"), Some("1870000002"));
        assert_eq!(generator.issued_users(), 3);
    }

    #[test]
    fn test_register_duplicate_username_fails() {
        let mut generator = TaskGenerator::with_payloads(0, ConstantNames, Limits::default());
        let err = generator.register(2).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateUsername {
                username: "same".to_string(),
                index: 1,
            }
        );
    }

    #[test]
    fn test_register_zero() {
        let mut generator = TaskGenerator::new(1);
        assert!(generator.register(0).unwrap().is_empty());
    }

    #[test]
    fn test_login_uses_issued_password() {
        let mut generator = TaskGenerator::new(5);
        let registered = generator.register(1).unwrap();
        let username = registered[0].payload_str("username").unwrap().to_string();
        let record = UserRecord {
            user_id: UserId::new(9),
            username,
            nickname: "n".to_string(),
            auth_token: "t".to_string(),
        };

        let logins = generator.login(&[record]).unwrap();
        assert_eq!(logins[0].payload_str("password"), Some("p@ssw0rd"));
        assert_eq!(logins[0].expected().unwrap()["user_id"], Value::from("9"));

        assert!(generator.login(&[user(77)]).is_err());
    }

    #[test]
    fn test_create_posts_requires_authors() {
        let mut generator = TaskGenerator::new(3);
        assert!(matches!(
            generator.create_posts(&[], 5),
            Err(Error::InvalidArgument { name: "authors", .. })
        ));
        assert!(generator.create_posts(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn test_create_posts_authors_from_pool() {
        let users = vec![user(1), user(2), user(3)];
        let mut generator = TaskGenerator::new(11);
        let descriptors = generator.create_posts(&users, 50).unwrap();

        assert_eq!(descriptors.len(), 50);
        for descriptor in &descriptors {
            let author = descriptor.payload_str("author_id").unwrap();
            let token = descriptor.auth_token().unwrap();
            assert!(["1", "2", "3"].contains(&author));
            assert_eq!(token, format!("token-{author}"));
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let users = vec![user(1), user(2), user(3)];
        let a = TaskGenerator::new(9).create_posts(&users, 20).unwrap();
        let b = TaskGenerator::new(9).create_posts(&users, 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_create_posts_per_user_is_user_major() {
        let users = vec![user(1), user(2), user(3)];
        let mut generator = TaskGenerator::new(0);
        let descriptors = generator.create_posts_per_user(&users, 2);

        let authors: Vec<&str> = descriptors
            .iter()
            .map(|d| d.payload_str("author_id").unwrap())
            .collect();
        assert_eq!(authors, vec!["1", "1", "2", "2", "3", "3"]);
        assert_eq!(descriptors[5].slot(), 5);
    }

    #[test]
    fn test_fields_truncated_to_server_limits() {
        let mut generator = TaskGenerator::with_payloads(0, ConstantNames, Limits::default());
        let posts = generator.create_posts_per_user(&[user(1)], 1);
        assert_eq!(posts[0].payload_str("title").unwrap().len(), 50);
        assert_eq!(posts[0].payload_str("content").unwrap().len(), 500);
    }

    #[test]
    fn test_reply_range() {
        assert!(ReplyRange::new(0, 3).is_ok());
        assert!(matches!(
            ReplyRange::new(3, 1),
            Err(Error::InvertedRange { min: 3, max: 1, .. })
        ));
    }

    #[test]
    fn test_reply_counts_within_range() {
        let users = vec![user(1), user(2)];
        let posts: Vec<PostRecord> = (0..30).map(|i| post(100 + i, 1)).collect();
        let mut generator = TaskGenerator::new(21);
        let descriptors = generator
            .reply(&posts, &users, ReplyRange::new(0, 3).unwrap())
            .unwrap();

        for p in &posts {
            let wire = p.post_id.to_wire();
            let count = descriptors
                .iter()
                .filter(|d| d.payload_str("post_id") == Some(wire.as_str()))
                .count();
            assert!(count <= 3);
        }
        for (i, descriptor) in descriptors.iter().enumerate() {
            assert_eq!(descriptor.slot(), i);
        }
    }

    #[test]
    fn test_reply_exact_count() {
        let users = vec![user(1)];
        let posts = vec![post(1, 1), post(2, 1)];
        let mut generator = TaskGenerator::new(2);
        let descriptors = generator.reply(&posts, &users, ReplyRange::exactly(2)).unwrap();
        assert_eq!(descriptors.len(), 4);
        assert_eq!(descriptors[0].payload_str("post_id"), Some("1"));
        assert_eq!(descriptors[3].payload_str("post_id"), Some("2"));
    }

    #[test]
    fn test_reply_without_users_fails_only_when_drawn() {
        let posts = vec![post(1, 1)];
        let mut generator = TaskGenerator::new(2);
        assert!(generator.reply(&posts, &[], ReplyRange::exactly(0)).unwrap().is_empty());
        assert!(generator.reply(&posts, &[], ReplyRange::exactly(1)).is_err());
    }
}
