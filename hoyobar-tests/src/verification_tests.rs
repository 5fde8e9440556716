//! Ordering verification tests against the simulated forum and scripted pages.

use std::collections::VecDeque;

use hoyobar_core::{Cursor, Page, PostId, PostRecord, UserId};
use hoyobar_workload::{
    verify_ordering, verify_reply_recency, ExecutorError, ListOrder, OrderingVerifier, PageFetcher, PostListFetcher,
    PostPlan, ReplyListFetcher, ReplyRange, RunSettings, VerifyState, Violation, WorkloadError,
};

use crate::scenarios::{faults, orchestrator, seeds, three_by_two, SCENARIO_TIMEOUT};
use crate::simulated_forum::SimulatedForum;

fn post(id: u64) -> PostRecord {
    PostRecord {
        post_id: PostId::new(id),
        author_id: UserId::new(id % 3 + 1),
        title: format!("title {id}"),
        content: format!("content {id}"),
    }
}

fn posts(ids: &[u64]) -> Vec<PostRecord> {
    ids.iter().copied().map(post).collect()
}

fn page(ids: &[u64], cursor: &str) -> Result<Page<PostRecord>, ExecutorError> {
    Ok(Page::new(Cursor::new(cursor), posts(ids)))
}

/// Serves canned pages and records every cursor it is asked for.
struct ScriptedFetcher {
    pages: VecDeque<Result<Page<PostRecord>, ExecutorError>>,
    seen: Vec<Cursor>,
}

impl ScriptedFetcher {
    fn new(pages: impl IntoIterator<Item = Result<Page<PostRecord>, ExecutorError>>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            seen: Vec::new(),
        }
    }
}

impl PageFetcher for ScriptedFetcher {
    type Item = PostRecord;

    fn describe(&self) -> String {
        "scripted list".to_string()
    }

    async fn fetch(&mut self, cursor: &Cursor) -> Result<Page<PostRecord>, ExecutorError> {
        self.seen.push(cursor.clone());
        self.pages.pop_front().unwrap_or_else(|| Ok(Page::empty()))
    }
}

#[tokio::test]
async fn test_verification_cursor_contract() {
    let mut fetcher = ScriptedFetcher::new([page(&[5, 4], "c-4"), page(&[3, 2], "c-2"), page(&[1], "c-1")]);
    let report = verify_ordering(&posts(&[5, 4, 3, 2, 1]), &mut fetcher).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.records, 5);
    assert_eq!(
        fetcher.seen,
        vec![Cursor::start(), Cursor::new("c-4"), Cursor::new("c-2")]
    );
}

#[tokio::test]
async fn test_verification_empty_expectation_fetches_nothing() {
    let mut fetcher = ScriptedFetcher::new([page(&[9], "x")]);
    let report = verify_ordering(&[], &mut fetcher).await.unwrap();
    assert_eq!(report.pages, 0);
    assert_eq!(report.records, 0);
    assert!(fetcher.seen.is_empty());
}

#[tokio::test]
async fn test_verification_field_mismatch() {
    let mut listed = posts(&[5, 4]);
    listed[1].title = "edited".to_string();
    let mut fetcher = ScriptedFetcher::new([Ok(Page::new(Cursor::new("c"), listed))]);

    let violation = verify_ordering(&posts(&[5, 4]), &mut fetcher).await.unwrap_err();
    assert!(matches!(
        violation,
        Violation::FieldMismatch {
            position: 1,
            field: "title",
            ..
        }
    ));
}

#[tokio::test]
async fn test_verification_count_mismatch() {
    // Server lists fewer records than created.
    let mut fetcher = ScriptedFetcher::new([page(&[5, 4], "c")]);
    let violation = verify_ordering(&posts(&[5, 4, 3]), &mut fetcher).await.unwrap_err();
    assert!(matches!(
        violation,
        Violation::CountMismatch {
            expected: 3,
            actual: 2,
            ..
        }
    ));

    // Server lists more records than created.
    let mut fetcher = ScriptedFetcher::new([page(&[5, 4, 3], "c")]);
    let violation = verify_ordering(&posts(&[5, 4]), &mut fetcher).await.unwrap_err();
    assert!(matches!(
        violation,
        Violation::CountMismatch {
            expected: 2,
            actual: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn test_verification_fetch_failure() {
    let mut fetcher = ScriptedFetcher::new([
        page(&[5], "c"),
        Err(ExecutorError::Transport("connection reset".to_string())),
    ]);
    let violation = verify_ordering(&posts(&[5, 4]), &mut fetcher).await.unwrap_err();
    match violation {
        Violation::FetchFailed { list, page, cause } => {
            assert_eq!(list, "scripted list");
            assert_eq!(page, 2);
            assert!(cause.contains("connection reset"));
        }
        other => panic!("expected FetchFailed, got {other}"),
    }
}

#[test]
fn test_verification_terminal_states_ignore_input() {
    let expected = posts(&[2, 1]);
    let mut verifier = OrderingVerifier::new("posts", &expected);
    assert_eq!(verifier.state(), VerifyState::Fetching);
    assert_eq!(verifier.remaining(), 2);

    assert_eq!(
        verifier.on_page(Page::new(Cursor::new("z"), posts(&[2, 1]))),
        VerifyState::Done
    );
    assert_eq!(verifier.on_page(Page::new(Cursor::new("y"), posts(&[7]))), VerifyState::Done);
    assert_eq!(
        verifier.on_fetch_error(&ExecutorError::Transport("late".to_string())),
        VerifyState::Done
    );
    assert_eq!(verifier.finish().unwrap().records, 2);
}

#[tokio::test]
async fn test_verification_three_users_two_posts_each() {
    let mut orch = orchestrator(SimulatedForum::new(), three_by_two(), 42, 1, 10);
    let summary = orch.run().await.unwrap();

    let verification = summary.verification.unwrap();
    assert_eq!(verification.checks.len(), 1);
    assert_eq!(verification.checks[0].records, 6);
    assert_eq!(verification.checks[0].pages, 2);

    // The oldest post was replied to last, so it leads the reply-time list.
    assert_eq!(verification.reply_recency, Some(PostId::new(1)));
    assert_eq!(orch.executor().reply_count(), 1);

    // Per-user order: user k authored posts 2k-1 and 2k.
    let authors: Vec<u64> = orch.ledger().posts().map(|p| p.author_id.get()).collect();
    assert_eq!(authors, vec![1, 1, 2, 2, 3, 3]);
}

#[tokio::test]
async fn test_verification_three_by_two_single_page() {
    for page_size in [6, 10] {
        let settings = RunSettings {
            page_size: Some(page_size),
            ..three_by_two()
        };
        let mut orch = orchestrator(SimulatedForum::new(), settings, 42, 1, 10);
        let summary = orch.run().await.unwrap();

        let check = &summary.verification.unwrap().checks[0];
        assert_eq!(check.records, 6);
        assert_eq!(check.pages, 1, "page size {page_size}");
    }
}

#[tokio::test]
async fn test_verification_passes_across_seeds() {
    for &seed in seeds::REGRESSION_SEEDS {
        let settings = RunSettings {
            users: 5,
            active_users: 4,
            posts: PostPlan::Random { count: 12 },
            replies: ReplyRange::new(0, 3).unwrap(),
            verify: true,
            page_size: Some(3),
            ..RunSettings::default()
        };
        let mut orch = orchestrator(SimulatedForum::new(), settings, seed, 16, 7);
        let summary = orch.run().await.unwrap();

        let verification = summary.verification.unwrap();
        let ledger = orch.ledger();
        let oldest = verification.reply_recency.unwrap();
        assert_eq!(Some(oldest), ledger.oldest_post().map(|p| p.post_id));

        // The recency reply lands after the reply lists were checked.
        let mut replied_before = ledger.posts_with_replies().len();
        if ledger.expected_replies_most_recent_first(oldest).len() == 1 {
            replied_before -= 1;
        }
        assert_eq!(verification.checks.len(), 1 + replied_before.min(10), "seed {seed}");
    }
}

#[tokio::test]
async fn test_verification_detects_misordered_list() {
    let forum = SimulatedForum::with_faults(faults::misordered_lists());
    let mut orch = orchestrator(forum, three_by_two(), 42, 4, 10);

    let err = orch.run().await.unwrap_err();
    assert!(matches!(
        err,
        WorkloadError::Verification(Violation::FieldMismatch {
            position: 0,
            field: "post_id",
            ..
        })
    ));
}

#[tokio::test]
async fn test_verification_detects_missing_records() {
    let forum = SimulatedForum::with_faults(faults::truncated_lists());
    let mut orch = orchestrator(forum, three_by_two(), 42, 4, 10);

    let err = orch.run().await.unwrap_err();
    assert!(matches!(
        err,
        WorkloadError::Verification(Violation::CountMismatch {
            expected: 6,
            actual: 5,
            ..
        })
    ));
}

#[tokio::test]
async fn test_verification_reply_recency_mismatch() {
    let settings = RunSettings {
        verify: false,
        ..three_by_two()
    };
    let mut orch = orchestrator(SimulatedForum::new(), settings, 42, 1, 10);
    orch.run().await.unwrap();

    // Without replies, reply-time order equals creation order.
    let violation = verify_reply_recency(orch.executor(), PostId::new(1), None, SCENARIO_TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(
        violation,
        Violation::ReplyRecencyMismatch {
            expected: PostId::new(1),
            actual: Some(PostId::new(6)),
        }
    );
    verify_reply_recency(orch.executor(), PostId::new(6), None, SCENARIO_TIMEOUT)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_verification_is_idempotent() {
    let settings = RunSettings {
        replies: ReplyRange::exactly(2),
        ..three_by_two()
    };
    let mut orch = orchestrator(SimulatedForum::new(), settings, 7, 4, 10);
    orch.run().await.unwrap();

    let expected = orch.ledger().expected_posts_most_recent_first();
    let forum = orch.executor();
    let mut first = PostListFetcher::new(forum, ListOrder::CreateTime, Some(4), SCENARIO_TIMEOUT);
    let mut second = PostListFetcher::new(forum, ListOrder::CreateTime, Some(4), SCENARIO_TIMEOUT);
    let a = verify_ordering(&expected, &mut first).await.unwrap();
    let b = verify_ordering(&expected, &mut second).await.unwrap();
    assert_eq!(a, b);

    let post_id = orch.ledger().posts_with_replies()[0];
    let replies = orch.ledger().expected_replies_most_recent_first(post_id);
    let mut fetcher = ReplyListFetcher::new(forum, post_id, Some(1), SCENARIO_TIMEOUT);
    let report = verify_ordering(&replies, &mut fetcher).await.unwrap();
    assert_eq!(report.records, replies.len());
    assert_eq!(report.pages, replies.len() as u64);
}
