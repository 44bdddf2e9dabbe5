//! Target discovery.
//!
//! Enumerates every community and conversation the user belongs to, probes
//! each with a zero-offset author search and keeps the ones that hold
//! authored messages.

use tokio::time::Instant;

use super::{
    Checkpoint, JobResult, Phase, ScanOrderItem, ScanTarget, Severity, TargetKind,
    context::JobContext,
};
use crate::api::{Community, Conversation, SearchQuery, User};

/// Scan job body: discover, probe, then publish the result.
pub(crate) async fn run_scan(ctx: JobContext) {
    match scan(&ctx).await {
        Ok(Some(targets)) => finish_scan(&ctx, targets),
        // Cancelled: the controller owns the state now.
        Ok(None) => return,
        Err(error) => {
            if ctx.is_cancelled() {
                return;
            }
            ctx.update(|shared, session| {
                session.progress.phase = Phase::Error;
                session.progress.last_error = error.to_string();
                shared.log_locked(session, Severity::Error, format!("Scan failed: {error}"));
                session.checkpoint = Checkpoint::fresh(&session.progress);
            });
        }
    }

    if let Err(error) = ctx.persist_checkpoint().await {
        tracing::warn!(error = %error, "Failed to persist scan checkpoint");
    }
    ctx.broadcast();
}

/// Order in which candidates are probed: communities, then conversations.
pub(crate) fn build_scan_order(
    communities: &[Community],
    conversations: &[Conversation],
) -> Vec<ScanOrderItem> {
    let communities = communities.iter().map(|community| ScanOrderItem {
        id: community.id.clone(),
        name: community.name.clone(),
        kind: TargetKind::Community,
        icon: community.icon_url(),
    });
    let conversations = conversations.iter().map(|conversation| ScanOrderItem {
        id: conversation.id.clone(),
        name: conversation.display_name(),
        kind: TargetKind::Conversation,
        icon: conversation.display_icon(),
    });
    communities.chain(conversations).collect()
}

/// Returns `None` when cancelled.
async fn scan(ctx: &JobContext) -> JobResult<Option<Vec<ScanTarget>>> {
    let Some((user, communities, conversations)) = discover(ctx).await? else {
        return Ok(None);
    };

    let order = build_scan_order(&communities, &conversations);
    let total = order.len();
    ctx.update(|shared, session| {
        session.progress.scan_order = order.clone();
        session.progress.scan_active_index = -1;
        shared.publish_locked(session);
    });

    let min_dwell = ctx.config().min_scan_item();
    let query = SearchQuery::by_author(user.id.as_str());
    let mut targets = Vec::new();

    for (index, item) in order.into_iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(None);
        }
        ctx.update(|shared, session| {
            session.progress.scan_active_index = index as i64;
            session.progress.scan_progress = format!("{} / {}", index + 1, total);
            session.progress.current_target = item.name.clone();
            shared.publish_locked(session);
        });
        let started = Instant::now();

        let probe = async {
            match item.kind {
                TargetKind::Community => ctx.remote().search_community(&item.id, &query).await,
                TargetKind::Conversation => {
                    ctx.remote().search_conversation(&item.id, &query).await
                }
            }
        };
        match ctx.call(probe).await {
            None => return Ok(None),
            Some(Ok(page)) if page.total_results > 0 => {
                tracing::debug!(
                    target_id = %item.id,
                    messages = page.total_results,
                    "Found authored messages"
                );
                targets.push(ScanTarget {
                    id: item.id,
                    name: item.name,
                    kind: item.kind,
                    icon: item.icon,
                    message_count: page.total_results,
                });
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => ctx.log(
                Severity::Warn,
                format!(
                    "Could not scan {} \"{}\": {error}",
                    item.kind.label(),
                    item.name
                ),
            ),
        }

        let elapsed = started.elapsed();
        if elapsed < min_dwell && !ctx.control.sleep(min_dwell - elapsed).await {
            return Ok(None);
        }
    }

    Ok(Some(targets))
}

async fn discover(
    ctx: &JobContext,
) -> JobResult<Option<(User, Vec<Community>, Vec<Conversation>)>> {
    ctx.log(Severity::Info, "Fetching user info...");
    let Some(user) = ctx.call(ctx.remote().current_user()).await else {
        return Ok(None);
    };
    let user = user?;
    ctx.log(
        Severity::Info,
        format!("Logged in as {} ({})", user.username, user.id),
    );
    ctx.update(|_, session| session.progress.user = Some(user.clone()));

    ctx.log(Severity::Info, "Fetching servers...");
    let Some(communities) = ctx.call(ctx.remote().list_communities()).await else {
        return Ok(None);
    };
    let communities = communities?;
    ctx.log(
        Severity::Info,
        format!("Found {} server(s)", communities.len()),
    );

    ctx.log(Severity::Info, "Fetching direct conversations...");
    let Some(conversations) = ctx.call(ctx.remote().list_conversations()).await else {
        return Ok(None);
    };
    let conversations = conversations?;
    ctx.log(
        Severity::Info,
        format!("Found {} conversation(s)", conversations.len()),
    );

    Ok(Some((user, communities, conversations)))
}

fn finish_scan(ctx: &JobContext, targets: Vec<ScanTarget>) {
    let total_messages: u64 = targets.iter().map(|t| t.message_count).sum();
    let communities = targets
        .iter()
        .filter(|t| t.kind == TargetKind::Community)
        .count();
    let conversations = targets.len() - communities;

    ctx.update(|shared, session| {
        let scanned = session.progress.scan_order.len() as i64;
        session.progress.scan_targets = targets;
        session.progress.scan_active_index = scanned - 1;
        session.progress.current_target.clear();
        session.progress.scan_progress.clear();

        if session.progress.scan_targets.is_empty() {
            shared.log_locked(
                session,
                Severity::Info,
                "No messages found in any server or conversation.".into(),
            );
        } else {
            shared.log_locked(
                session,
                Severity::Success,
                format!(
                    "Scan complete: {total_messages} message(s) across {communities} server(s) and {conversations} conversation(s)."
                ),
            );
        }

        session.progress.phase = Phase::ScanComplete;
        session.checkpoint = Checkpoint::fresh(&session.progress);
    });
}
