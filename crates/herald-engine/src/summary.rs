//! End-of-run summaries: an operator text, an audit text with the full error
//! breakdown, and an optional chart.

use herald_core::traits::OperatorUi;
use herald_core::types::OperationKind;

use crate::chart;
use crate::retry::ErrorKind;
use crate::run_state::RunSnapshot;

/// Everything delivered when a run ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub operator: String,
    pub audit: String,
    /// PNG bytes; `None` when the chart could not be rendered.
    pub chart: Option<Vec<u8>>,
}

/// Headline for a finished run.
pub fn reason(snapshot: &RunSnapshot) -> String {
    let title = match snapshot.kind {
        OperationKind::UserBroadcast => "Broadcast",
        OperationKind::ChannelBroadcast => "Channel broadcast",
        OperationKind::ChannelModeration => "Channel action",
    };
    if snapshot.stopped {
        format!("🛑 {title} has been stopped.")
    } else {
        format!("✅ {title} Has Been Completed.")
    }
}

pub fn build(snapshot: &RunSnapshot) -> Summary {
    let chart = match chart::render_png(snapshot) {
        Ok(png) => Some(png),
        Err(e) => {
            tracing::debug!("📉 No chart for this run: {e}");
            None
        }
    };
    Summary {
        operator: operator_text(snapshot),
        audit: audit_text(snapshot),
        chart,
    }
}

fn verb(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::ChannelModeration => "processed",
        _ => "broadcasted",
    }
}

fn operator_text(s: &RunSnapshot) -> String {
    let noun = s.kind.target_noun();
    format!(
        "<b>{reason}</b>\n\n\
         Total {noun} : {total} {noun}\n\
         {Noun} {verb} : {done} {noun}\n\
         Failed {noun} ( blocked ) : {blocked} {noun}\n\
         Errors encountered : {errors} errors\n\
         Time taken : {secs:.2} seconds\n\n\
         Success rate : {rate:.2}%",
        reason = reason(s),
        Noun = capitalize(noun),
        verb = verb(s.kind),
        total = s.total,
        done = s.done,
        blocked = s.tally.get(ErrorKind::BotBlocked),
        errors = s.errors,
        secs = s.elapsed.as_secs_f64(),
        rate = s.success_rate(),
    )
}

fn audit_text(s: &RunSnapshot) -> String {
    let noun = s.kind.target_noun();
    let mut text = format!(
        "<b>{reason}</b>\n\n\
         • <b>Total {noun}</b>: {total} {noun}\n\
         • <b>{Noun} {verb}</b>: {done} {noun}\n\
         • <b>Time taken</b>: {secs:.2} seconds\n\
         • <b>Failed {noun}</b>: {failed} {noun}\n\
         • <b>Errors encountered</b>: {errors} errors\n",
        reason = reason(s),
        Noun = capitalize(noun),
        verb = verb(s.kind),
        total = s.total,
        done = s.done,
        secs = s.elapsed.as_secs_f64(),
        failed = s.failed_targets.len(),
        errors = s.errors,
    );
    for kind in ErrorKind::ALL {
        text.push_str(&format!(
            "  - <b>{} ({kind})</b>: {}\n",
            kind.code(),
            s.tally.get(kind)
        ));
    }
    text.push_str(&format!("\nSuccess rate : {:.2}%", s.success_rate()));
    text
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Send the operator summary, and the audit summary when an owner is set.
///
/// The chart goes out as a photo captioned with the text; if that upload
/// fails the text is sent on its own. Delivery errors are logged, not returned.
pub async fn deliver(ui: &dyn OperatorUi, operator_chat: i64, owner_chat: Option<i64>, summary: &Summary) {
    if let Some(owner) = owner_chat {
        deliver_one(ui, owner, &summary.audit, summary.chart.as_deref()).await;
    }
    deliver_one(ui, operator_chat, &summary.operator, summary.chart.as_deref()).await;
}

async fn deliver_one(ui: &dyn OperatorUi, chat_id: i64, text: &str, chart: Option<&[u8]>) {
    if let Some(bytes) = chart {
        match ui
            .send_photo(chat_id, "summary.png", bytes.to_vec(), text)
            .await
        {
            Ok(_) => return,
            Err(e) => tracing::warn!("⚠️ Chart upload to {chat_id} failed, sending text: {e}"),
        }
    }
    if let Err(e) = ui.send(chat_id, text).await {
        tracing::warn!("⚠️ Summary delivery to {chat_id} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_state::RunRegistry;
    use crate::testing::RecordingUi;

    fn finished(total: usize, done: usize, failures: &[(&str, ErrorKind)]) -> RunSnapshot {
        let registry = RunRegistry::new();
        let handle = registry.start(OperationKind::UserBroadcast, total).unwrap();
        for _ in 0..done {
            handle.state().record_success();
        }
        for (id, kind) in failures {
            handle.state().record_failure(id, *kind);
        }
        handle.finish(false)
    }

    #[test]
    fn test_zero_targets_reports_zero_rate() {
        let summary = build(&finished(0, 0, &[]));
        assert!(summary.operator.contains("Success rate : 0.00%"));
        assert!(summary.audit.contains("Success rate : 0.00%"));
        assert!(summary.chart.is_none());
    }

    #[test]
    fn test_operator_and_audit_texts() {
        let snap = finished(
            4,
            2,
            &[("7", ErrorKind::BotBlocked), ("8", ErrorKind::Unknown)],
        );
        let summary = build(&snap);

        assert!(summary.operator.starts_with("<b>✅ Broadcast Has Been Completed.</b>"));
        assert!(summary.operator.contains("Total users : 4 users"));
        assert!(summary.operator.contains("Users broadcasted : 2 users"));
        assert!(summary.operator.contains("Failed users ( blocked ) : 1 users"));
        assert!(summary.operator.contains("Success rate : 50.00%"));

        assert!(summary.audit.contains("<b>Failed users</b>: 2 users"));
        assert!(summary.audit.contains("<b>403 (Bot blocked)</b>: 1"));
        assert!(summary.audit.contains("<b>000 (Unknown)</b>: 1"));
        assert!(summary.audit.contains("<b>401 (Unauthorized)</b>: 0"));
        assert!(summary.chart.is_some());
    }

    #[test]
    fn test_stopped_reason() {
        let registry = RunRegistry::new();
        let handle = registry.start(OperationKind::ChannelBroadcast, 3).unwrap();
        let snap = handle.finish(true);
        assert_eq!(reason(&snap), "🛑 Channel broadcast has been stopped.");
    }

    #[tokio::test]
    async fn test_deliver_chart_with_owner_copy() {
        let ui = RecordingUi::default();
        let summary = build(&finished(2, 2, &[]));
        deliver(&ui, 1, Some(77), &summary).await;

        let photos = ui.photos();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].0, 77);
        assert_eq!(photos[0].3, summary.audit);
        assert_eq!(photos[1].0, 1);
        assert_eq!(photos[1].1, "summary.png");
        assert!(photos[1].2.starts_with(b"\x89PNG"));
        assert_eq!(photos[1].3, summary.operator);
        assert!(ui.sent().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_falls_back_to_text() {
        let ui = RecordingUi::default();
        ui.fail_photos();
        let summary = build(&finished(2, 1, &[("5", ErrorKind::NotFound)]));
        deliver(&ui, 1, None, &summary).await;

        assert_eq!(ui.sent(), vec![(1, summary.operator.clone())]);
    }
}
