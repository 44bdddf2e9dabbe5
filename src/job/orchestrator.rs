//! Deletion run: walks the selected targets and deletes authored messages
//! page by page, checkpointing as it goes.
//!
//! Search results are always re-read from offset 0 after a page is
//! processed. Every delete shifts the server's result indices, so any other
//! offset would skip or repeat messages.

use std::collections::HashSet;

use super::{
    Checkpoint, JobError, JobResult, Phase, ScanTarget, Severity, TargetKind,
    context::JobContext, model::now_millis,
};
use crate::api::{DeleteOutcome, Message, SearchPage, SearchQuery};

/// How a target or a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Finished,
    Cancelled,
}

/// Deletion job body.
///
/// An empty `target_ids` reuses the selection stored in the checkpoint. With
/// `resume`, counters and per-target cursors carry over from the checkpoint.
pub(crate) async fn run_deletion(ctx: JobContext, target_ids: Vec<String>, resume: bool) {
    let Some(prepared) = prepare(&ctx, target_ids, resume) else {
        return;
    };
    let (selected, user_id) = match prepared {
        Ok(prepared) => prepared,
        Err(error) => {
            fail(&ctx, "", &error.to_string());
            if let Err(error) = ctx.persist_checkpoint().await {
                tracing::warn!(error = %error, "Failed to persist checkpoint after error");
            }
            ctx.broadcast();
            return;
        }
    };

    if let Err(error) = ctx.persist_checkpoint().await {
        tracing::warn!(error = %error, "Failed to persist deletion selection");
    }
    if resume {
        ctx.log(Severity::Info, "Resuming deletion from saved checkpoint.");
    }

    match delete_targets(&ctx, &selected, &user_id).await {
        Ok(Flow::Cancelled) => return,
        Ok(Flow::Finished) => finish(&ctx),
        Err(error) => {
            if ctx.is_cancelled() {
                return;
            }
            fail(&ctx, "Deletion failed: ", &error.to_string());
            if let Err(error) = ctx.persist_checkpoint().await {
                tracing::warn!(error = %error, "Failed to persist checkpoint after error");
            }
        }
    }
    ctx.broadcast();
}

/// Resolve the selection and reset counters. `None` when cancelled.
fn prepare(
    ctx: &JobContext,
    target_ids: Vec<String>,
    resume: bool,
) -> Option<JobResult<(Vec<ScanTarget>, String)>> {
    ctx.update(|shared, session| {
        let ids = if target_ids.is_empty() {
            session.checkpoint.selected_target_ids.clone()
        } else {
            target_ids
        };
        session.last_target_ids = ids.clone();

        let selected: Vec<ScanTarget> = session
            .progress
            .scan_targets
            .iter()
            .filter(|target| ids.contains(&target.id))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(JobError::NoSelectedTargets);
        }
        let user_id = session
            .progress
            .user
            .as_ref()
            .map(|user| user.id.clone())
            .ok_or(JobError::MissingIdentity)?;

        let progress = &mut session.progress;
        progress.total_found = selected.iter().map(|t| t.message_count).sum();
        if !resume {
            progress.reset_counters();
            progress.started_at = now_millis();
        }
        if progress.started_at == 0 {
            progress.started_at = now_millis();
        }
        progress.phase = Phase::Deleting;
        progress.last_error.clear();

        if !resume {
            session.checkpoint = Checkpoint::fresh(&session.progress);
        }
        session.checkpoint.selected_target_ids = ids;
        shared.publish_locked(session);

        tracing::info!(
            targets = selected.len(),
            total_found = session.progress.total_found,
            resume,
            "Starting deletion"
        );
        Ok((selected, user_id))
    })
}

async fn delete_targets(
    ctx: &JobContext,
    selected: &[ScanTarget],
    user_id: &str,
) -> JobResult<Flow> {
    for target in selected {
        if ctx.is_cancelled() {
            return Ok(Flow::Cancelled);
        }

        let completed = ctx
            .update(|_, session| session.checkpoint.is_completed(&target.id))
            .unwrap_or(false);
        if completed {
            ctx.log(
                Severity::Info,
                format!("Skipping already-processed \"{}\"", target.name),
            );
            continue;
        }

        ctx.update(|_, session| session.checkpoint.enter_target(&target.id));
        if delete_target(ctx, target, user_id).await? == Flow::Cancelled {
            return Ok(Flow::Cancelled);
        }

        ctx.update(|_, session| session.checkpoint.complete_target(&target.id));
        ctx.persist_checkpoint().await?;
    }

    Ok(if ctx.is_cancelled() {
        Flow::Cancelled
    } else {
        Flow::Finished
    })
}

async fn delete_target(ctx: &JobContext, target: &ScanTarget, user_id: &str) -> JobResult<Flow> {
    let Some((mut offset, resumed_at)) = ctx.update(|shared, session| {
        session.progress.current_target = target.name.clone();
        shared.save_checkpoint_locked(session);
        shared.publish_locked(session);
        (
            session.checkpoint.current_offset,
            session.checkpoint.processed_in_active_target,
        )
    }) else {
        return Ok(Flow::Cancelled);
    };

    if resumed_at > 0 {
        ctx.log(
            Severity::Info,
            format!(
                "Resuming \"{}\" from last checkpoint ({resumed_at} processed in target).",
                target.name
            ),
        );
    }
    ctx.log(
        Severity::Info,
        format!("Deleting messages in \"{}\"...", target.name),
    );

    let retry_max = ctx.config().empty_search_retry_max;
    let mut empty_retries = 0;
    let mut processed_here: u64 = 0;
    let mut handled: HashSet<String> = HashSet::new();

    loop {
        if !ctx.wait_if_paused().await {
            return Ok(Flow::Cancelled);
        }

        let query = SearchQuery::by_author(user_id).with_offset(offset);
        let Some(page) = ctx.call(search(ctx, target, &query)).await else {
            return Ok(Flow::Cancelled);
        };
        let fresh: Vec<Message> = page?
            .flatten()
            .filter(|message| message.author.id == user_id && !handled.contains(&message.id))
            .collect();

        if fresh.is_empty() {
            let expected_remaining = target.message_count.saturating_sub(processed_here);

            if expected_remaining > 0 && empty_retries < retry_max {
                empty_retries += 1;
                ctx.log(
                    Severity::Warn,
                    format!(
                        "Search returned no new messages for \"{}\" but about {expected_remaining} may remain. Retrying ({empty_retries}/{retry_max})...",
                        target.name
                    ),
                );
                if !ctx.control.sleep(ctx.config().empty_search_delay(empty_retries)).await {
                    return Ok(Flow::Cancelled);
                }
                continue;
            }

            if expected_remaining > 0 {
                ctx.log(
                    Severity::Warn,
                    format!(
                        "Stopping \"{}\" after {retry_max} empty search retries. About {expected_remaining} message(s) may remain due to search lag.",
                        target.name
                    ),
                );
            }
            return Ok(Flow::Finished);
        }
        empty_retries = 0;

        for message in fresh {
            if !ctx.wait_if_paused().await {
                return Ok(Flow::Cancelled);
            }
            handled.insert(message.id.clone());

            let Some(outcome) = ctx
                .call(ctx.remote().delete_message(&message.channel_id, &message.id))
                .await
            else {
                return Ok(Flow::Cancelled);
            };
            processed_here += 1;

            let recorded = ctx.update(|shared, session| {
                let progress = &mut session.progress;
                match &outcome {
                    Ok(DeleteOutcome::Deleted) => progress.deleted += 1,
                    Ok(DeleteOutcome::Skipped(reason)) => {
                        progress.skipped += 1;
                        progress.failure_summary.increment(reason.category());
                        shared.log_locked(
                            session,
                            Severity::Warn,
                            format!("Skipped message {} (not found or no permission)", message.id),
                        );
                    }
                    Err(error) => {
                        progress.failed += 1;
                        progress.failure_summary.increment(error.category());
                        shared.log_locked(
                            session,
                            Severity::Error,
                            format!("Failed to delete {}: {error}", message.id),
                        );
                    }
                }
                session.checkpoint.processed_in_active_target = resumed_at + processed_here;
                shared.save_checkpoint_locked(session);
                shared.publish_locked(session);
            });
            if recorded.is_none() {
                return Ok(Flow::Cancelled);
            }
        }

        offset = 0;
        ctx.update(|_, session| session.checkpoint.current_offset = offset);
        ctx.persist_checkpoint().await?;
    }
}

async fn search(
    ctx: &JobContext,
    target: &ScanTarget,
    query: &SearchQuery,
) -> Result<SearchPage, crate::api::ApiError> {
    match target.kind {
        TargetKind::Community => ctx.remote().search_community(&target.id, query).await,
        TargetKind::Conversation => ctx.remote().search_conversation(&target.id, query).await,
    }
}

fn finish(ctx: &JobContext) {
    ctx.update(|shared, session| {
        let processed = session.progress.processed();
        let total = session.progress.total_found;
        if processed < total {
            shared.log_locked(
                session,
                Severity::Warn,
                format!(
                    "Deletion ended with {processed}/{total} processed. Search results can lag behind deletes; run a scan again to catch remaining messages."
                ),
            );
        }

        session.progress.phase = Phase::Done;
        session.progress.current_target.clear();
        let summary = format!(
            "Finished. Deleted: {}, Failed: {}, Skipped: {}",
            session.progress.deleted, session.progress.failed, session.progress.skipped
        );
        shared.log_locked(session, Severity::Success, summary);
        shared.writer.clear_checkpoint();
    });
}

fn fail(ctx: &JobContext, prefix: &str, message: &str) {
    ctx.update(|shared, session| {
        session.progress.phase = Phase::Error;
        session.progress.last_error = message.to_string();
        shared.log_locked(session, Severity::Error, format!("{prefix}{message}"));
    });
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use rstest::rstest;
    use tokio::{sync::broadcast::error::TryRecvError, time::Instant};

    use super::*;
    use crate::{
        api::{ApiError, Community, FailureCategory, SkipReason},
        job::{
            JobController, JobProgress,
            testing::{FakeRemote, RecordingStore, controller_with, controller_with_store},
        },
        store::{CHECKPOINT_KEY, KeyValueStore, LOGS_KEY, MemoryStore, StoreExt},
    };

    fn community(id: &str) -> Community {
        Community {
            id: id.into(),
            name: format!("Server {id}"),
            icon: None,
        }
    }

    async fn scanned(remote: FakeRemote) -> (JobController, Arc<FakeRemote>) {
        let (controller, remote) = controller_with(remote).await;
        controller.start_scan().await.unwrap();
        controller.wait().await;
        assert_eq!(controller.phase(), Phase::ScanComplete);
        (controller, remote)
    }

    fn messages(controller: &JobController) -> Vec<String> {
        controller
            .snapshot()
            .logs
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }

    fn searches_in(remote: &FakeRemote, scope: &str) -> usize {
        remote
            .search_calls()
            .iter()
            .filter(|(id, _)| id == scope)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_selected_targets() {
        let store = Arc::new(MemoryStore::new());
        let remote = FakeRemote::new("me")
            .with_community(community("g1"), 3)
            .with_community(community("g2"), 2)
            .with_community(community("g3"), 4);
        let (controller, remote) = controller_with_store(remote, store.clone()).await;
        controller.start_scan().await.unwrap();
        controller.wait().await;

        controller
            .start_deletion(vec!["g1".into(), "g2".into()])
            .await
            .unwrap();
        controller.wait().await;
        controller.flush().await.unwrap();

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.total_found, 5);
        assert_eq!((state.deleted, state.failed, state.skipped), (5, 0, 0));
        assert!(state.current_target.is_empty());
        assert!(state.started_at > 0);
        assert_eq!(remote.remaining("g1"), 0);
        assert_eq!(remote.remaining("g2"), 0);
        assert_eq!(remote.remaining("g3"), 4);
        // Every page is re-read from the top.
        assert!(remote.search_calls().iter().all(|(_, offset)| *offset == 0));

        let logs = messages(&controller);
        assert!(logs.contains(&"Deleting messages in \"Server g1\"...".to_string()));
        assert_eq!(
            logs.last().map(String::as_str),
            Some("Finished. Deleted: 5, Failed: 0, Skipped: 0")
        );

        // The run finished: no checkpoint to resume, but the log survives.
        assert!(store.get(CHECKPOINT_KEY).await.unwrap().is_none());
        assert!(store.get(LOGS_KEY).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_once_count_is_reached() {
        let (controller, remote) = scanned(FakeRemote::new("me").with_community(community("g1"), 10)).await;

        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        controller.wait().await;

        assert_eq!(controller.snapshot().state.deleted, 10);
        // Scan probe, one full page, one empty page.
        assert_eq!(searches_in(&remote, "g1"), 3);
        assert!(!messages(&controller).iter().any(|m| m.contains("Retrying")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_retries_then_abandons_target() {
        let (controller, remote) = scanned(FakeRemote::new("me").with_community(community("g1"), 5)).await;
        // The scan counted 5 but only 2 will ever show up.
        remote.drop_messages("g1", 3);

        let started = Instant::now();
        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        controller.wait().await;
        let elapsed = started.elapsed();

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.deleted, 2);
        assert!(state.last_error.is_empty());

        // 1200 + 2400 + 3600 + 4800 + 6000 ms of backoff.
        assert!(elapsed >= Duration::from_millis(18_000));
        assert!(elapsed < Duration::from_millis(19_000));
        // Scan probe, one page with hits, then the initial empty page and five retries.
        assert_eq!(searches_in(&remote, "g1"), 8);

        let logs = messages(&controller);
        for attempt in 1..=5 {
            let marker = format!("Retrying ({attempt}/5)");
            assert!(logs.iter().any(|m| m.contains(&marker)), "missing {marker}");
        }
        assert!(logs.iter().any(|m| m.starts_with("Stopping \"Server g1\" after 5 empty search retries. About 3 message(s)")));
        assert!(logs.iter().any(|m| m.starts_with("Deletion ended with 2/5 processed.")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_lag_recovers_and_resets_retries() {
        let (controller, remote) = scanned(FakeRemote::new("me").with_community(community("g1"), 3)).await;
        remote.lag_search("g1", 2);

        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        controller.wait().await;

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.deleted, 3);
        let logs = messages(&controller);
        assert!(logs.iter().any(|m| m.contains("Retrying (2/5)")));
        assert!(!logs.iter().any(|m| m.contains("Retrying (3/5)")));
        assert!(!logs.iter().any(|m| m.starts_with("Stopping")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_messages_are_never_deleted() {
        let remote = FakeRemote::new("me").with_community(community("g1"), 2);
        remote.add_foreign_messages("g1", 3);
        let (controller, remote) = scanned(remote).await;

        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        controller.wait().await;

        assert_eq!(controller.snapshot().state.deleted, 2);
        assert_eq!(remote.deleted(), vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(remote.remaining("g1"), 3);
    }

    #[rstest]
    #[case::forbidden(Ok(DeleteOutcome::Skipped(SkipReason::Permission)), (2, 0, 1), FailureCategory::Permission)]
    #[case::already_gone(Ok(DeleteOutcome::Skipped(SkipReason::NotFound)), (2, 0, 1), FailureCategory::NotFound)]
    #[case::network(Err(ApiError::Network("connection reset".into())), (2, 1, 0), FailureCategory::Network)]
    #[case::server_error(
        Err(ApiError::Status { status: 500, method: "DELETE", path: "/x".into(), body: "oops".into() }),
        (2, 1, 0),
        FailureCategory::Unknown
    )]
    #[tokio::test(start_paused = true)]
    async fn test_delete_outcome_accounting(
        #[case] outcome: crate::api::ApiResult<DeleteOutcome>,
        #[case] expected: (u64, u64, u64),
        #[case] category: FailureCategory,
    ) {
        let remote = FakeRemote::new("me").with_community(community("g1"), 3);
        remote.script_delete("m2", outcome);
        let (controller, _) = scanned(remote).await;

        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        controller.wait().await;

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!((state.deleted, state.failed, state.skipped), expected);
        assert_eq!(state.failure_summary.get(category), 1);
        assert_eq!(state.failure_summary.total(), 1);
        assert!(messages(&controller).iter().any(|m| m.contains("m2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_completed_targets() {
        let store = Arc::new(MemoryStore::new());
        let remote = FakeRemote::new("me")
            .with_community(community("A"), 2)
            .with_community(community("B"), 1);

        // A previous run finished A and was interrupted before B.
        let progress = JobProgress {
            phase: Phase::Deleting,
            scan_targets: vec![
                ScanTarget {
                    id: "A".into(),
                    name: "Server A".into(),
                    kind: TargetKind::Community,
                    icon: None,
                    message_count: 2,
                },
                ScanTarget {
                    id: "B".into(),
                    name: "Server B".into(),
                    kind: TargetKind::Community,
                    icon: None,
                    message_count: 1,
                },
            ],
            total_found: 3,
            deleted: 2,
            user: Some(crate::api::User {
                id: "me".into(),
                username: "tester".into(),
                discriminator: None,
                avatar: None,
                global_name: None,
            }),
            started_at: 1,
            ..Default::default()
        };
        let mut checkpoint = Checkpoint::fresh(&progress);
        checkpoint.selected_target_ids = vec!["A".into(), "B".into()];
        checkpoint.completed_targets = vec!["A".into()];
        store.set_json(CHECKPOINT_KEY, &checkpoint).await.unwrap();

        let (controller, remote) = controller_with_store(remote, store).await;
        assert_eq!(controller.phase(), Phase::Paused);

        controller.retry().await.unwrap();
        controller.wait().await;

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.deleted, 3);
        assert_eq!(state.started_at, 1);
        assert_eq!(remote.remaining("A"), 2);
        assert_eq!(remote.remaining("B"), 0);
        assert_eq!(searches_in(&remote, "A"), 0);
        assert!(messages(&controller).contains(&"Skipping already-processed \"Server A\"".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_inside_active_target() {
        let store = Arc::new(RecordingStore::new());
        // Three of B's five messages went in the interrupted run.
        let remote = FakeRemote::new("me")
            .with_community(community("A"), 0)
            .with_community(community("B"), 2);

        let target = |id: &str, message_count| ScanTarget {
            id: id.into(),
            name: format!("Server {id}"),
            kind: TargetKind::Community,
            icon: None,
            message_count,
        };
        let progress = JobProgress {
            phase: Phase::Deleting,
            scan_targets: vec![target("A", 2), target("B", 5)],
            total_found: 7,
            deleted: 5,
            user: Some(crate::api::User {
                id: "me".into(),
                username: "tester".into(),
                discriminator: None,
                avatar: None,
                global_name: None,
            }),
            started_at: 1,
            ..Default::default()
        };
        let mut checkpoint = Checkpoint::fresh(&progress);
        checkpoint.selected_target_ids = vec!["A".into(), "B".into()];
        checkpoint.completed_targets = vec!["A".into()];
        checkpoint.active_target_id = Some("B".into());
        checkpoint.processed_in_active_target = 3;
        store.set_json(CHECKPOINT_KEY, &checkpoint).await.unwrap();

        let (controller, remote) = controller_with_store(remote, store.clone()).await;
        assert_eq!(controller.phase(), Phase::Paused);

        controller.retry().await.unwrap();
        controller.wait().await;
        controller.flush().await.unwrap();

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!((state.deleted, state.failed, state.skipped), (7, 0, 0));
        assert_eq!(state.started_at, 1);
        assert_eq!(remote.deleted(), vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(searches_in(&remote, "A"), 0);

        let logs = messages(&controller);
        assert!(logs.contains(
            &"Resuming \"Server B\" from last checkpoint (3 processed in target).".to_string()
        ));
        // The empty-page estimate only counts what this run handled.
        assert!(logs.iter().any(|m| m.starts_with("Stopping \"Server B\" after 5 empty search retries. About 3 message(s)")));
        assert!(!logs.iter().any(|m| m.starts_with("Deletion ended with")));

        let saved = store.checkpoints();
        assert!(saved.len() > 2);
        for checkpoint in &saved {
            match &checkpoint.active_target_id {
                Some(active) => {
                    assert!(checkpoint.selected_target_ids.contains(active));
                    assert!(!checkpoint.is_completed(active));
                }
                None => {
                    assert_eq!(checkpoint.current_offset, 0);
                    assert_eq!(checkpoint.processed_in_active_target, 0);
                }
            }
        }
        // Cursors carried over and kept counting from the saved position.
        let counts: Vec<u64> = saved
            .iter()
            .filter(|c| c.active_target_id.as_deref() == Some("B"))
            .map(|c| c.processed_in_active_target)
            .collect();
        assert!(counts.iter().all(|count| *count >= 3));
        assert!(counts.contains(&4) && counts.contains(&5));
        assert_eq!(store.get(CHECKPOINT_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_at_page_boundary_fails_job() {
        let store = Arc::new(RecordingStore::new());
        let remote = FakeRemote::new("me").with_community(community("g1"), 3);
        let (controller, remote) = controller_with_store(remote, store.clone()).await;
        controller.start_scan().await.unwrap();
        controller.wait().await;

        store.fail_writes(true);
        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        controller.wait().await;

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.last_error, "Checkpoint store error: IO error: disk full");
        // The page in hand is finished before the durable save is attempted.
        assert_eq!(remote.deleted().len(), 3);
        assert!(messages(&controller).iter().any(|m| m.starts_with("Deletion failed: Checkpoint store error")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_between_deletes() {
        let (controller, remote) = scanned(FakeRemote::new("me").with_community(community("g1"), 10)).await;

        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        // Inside the fourth delete.
        tokio::time::sleep(Duration::from_millis(350)).await;
        controller.pause();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(controller.phase(), Phase::Paused);
        // The in-flight delete was allowed to finish.
        let deleted_at_pause = remote.deleted().len();
        assert_eq!(deleted_at_pause, 4);
        assert_eq!(controller.snapshot().state.deleted, 4);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.deleted().len(), deleted_at_pause);
        let searches_while_paused = remote.search_calls().len();

        controller.resume();
        controller.wait().await;

        let state = controller.snapshot().state;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.deleted, 10);
        // Resuming finishes the page it was on before searching again.
        assert_eq!(remote.search_calls().len(), searches_while_paused + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_paused() {
        let (controller, remote) = scanned(FakeRemote::new("me").with_community(community("g1"), 10)).await;

        controller.start_deletion(vec!["g1".into()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        controller.pause();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(controller.phase(), Phase::Paused);

        controller.cancel().await;
        controller.wait().await;
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(remote.deleted().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_selection_fails_job() {
        let (controller, remote) = scanned(FakeRemote::new("me").with_community(community("g1"), 1)).await;

        controller.start_deletion(vec!["missing".into()]).await.unwrap();
        controller.wait().await;

        let update = controller.snapshot();
        assert_eq!(update.state.phase, Phase::Error);
        assert_eq!(update.state.last_error, "No selected targets to resume.");
        assert!(update.logs.iter().any(|l| l.level == Severity::Error));
        assert!(remote.deleted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_counters_stay_bounded() {
        let remote = FakeRemote::new("me")
            .with_community(community("g1"), 4)
            .with_community(community("g2"), 3);
        remote.script_delete("m2", Ok(DeleteOutcome::Skipped(SkipReason::Permission)));
        remote.script_delete("m6", Err(ApiError::Network("reset".into())));
        let (controller, _) = scanned(remote).await;

        let mut updates = controller.subscribe();
        controller
            .start_deletion(vec!["g1".into(), "g2".into()])
            .await
            .unwrap();
        controller.wait().await;

        let mut seen = 0;
        let mut saw_deleting = false;
        loop {
            match updates.try_recv() {
                Ok(update) => {
                    let state = update.state;
                    seen += 1;
                    saw_deleting |= state.phase == Phase::Deleting;
                    assert!(state.processed() <= state.total_found + 1);
                    assert!(state.failure_summary.total() <= state.failed + state.skipped);
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert!(seen > 0);
        assert!(saw_deleting);

        let state = controller.snapshot().state;
        assert_eq!((state.deleted, state.failed, state.skipped), (5, 1, 1));
    }
}
