use ladder_core::domain::request::RequestId;
use ladder_core::domain::step::ClarificationTarget;
use ladder_core::history::{render_history, HistoryEntry, RenderedHistory};
use ladder_db::{RequestRepository, SqlRequestRepository};

use crate::commands::{current_pool, load_config, runtime, CommandResult, StepFailure};

pub fn run(request_id: &str) -> CommandResult {
    let request_id = request_id.trim();
    if request_id.is_empty() {
        return CommandResult::failure("history", "invalid_argument", "request id is empty", 2);
    }

    let config = match load_config("history") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("history") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let id = RequestId(request_id.to_owned());
    let result = runtime.block_on(async {
        let pool = current_pool(&config).await?;
        let repository = SqlRequestRepository::new(pool.clone());
        let outcome = load_history(&repository, &id).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(history) => CommandResult::success("history", render_text(&id, &history)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("history", error_class, message, exit_code)
        }
    }
}

async fn load_history<R>(repository: &R, id: &RequestId) -> Result<RenderedHistory, StepFailure>
where
    R: RequestRepository + ?Sized,
{
    let request = repository
        .find_by_id(id)
        .await
        .map_err(|error| ("history_lookup", error.to_string(), 4u8))?;
    if request.is_none() {
        return Err(("not_found", format!("request `{id}` was not found"), 6u8));
    }

    let steps = repository
        .list_steps(id)
        .await
        .map_err(|error| ("history_lookup", error.to_string(), 4u8))?;
    Ok(render_history(&steps))
}

fn render_text(id: &RequestId, history: &RenderedHistory) -> String {
    let mut lines = vec![format!(
        "request {id}: {} entries, {} open clarifications",
        history.entries.len(),
        history.open_clarifications
    )];
    for entry in &history.entries {
        lines.push(render_entry(entry));
        for clarification in &entry.clarifications {
            let target = match &clarification.target {
                ClarificationTarget::Requester => "requester".to_owned(),
                ClarificationTarget::ApproverPosition { level } => format!("level {level}"),
            };
            let question = clarification.question.as_deref().unwrap_or("-");
            let answer = clarification.response.as_deref().unwrap_or("(awaiting response)");
            lines.push(format!("    ? to {target}: {question}"));
            lines.push(format!("      > {answer}"));
        }
    }
    lines.join("\n")
}

fn render_entry(entry: &HistoryEntry) -> String {
    let mut line =
        format!("  {}: {} [{}]", entry.label, entry.status_text, entry.approver_position);
    if let Some(actor) = &entry.actor {
        line.push_str(&format!(" by {actor}"));
    }
    if let Some(comment) = entry.comment.as_deref().filter(|comment| !comment.trim().is_empty()) {
        line.push_str(&format!(" ({comment})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ladder_core::domain::approver::ApproverRef;
    use ladder_core::domain::hierarchy::{HierarchyId, HierarchyKey};
    use ladder_core::domain::request::{RequestId, RequestInstance, RequestKind};
    use ladder_core::hierarchy::HierarchyManager;
    use ladder_core::workflow::{SequentialResolver, WorkflowEngine};
    use ladder_db::{InMemoryRequestRepository, RequestRepository};

    use super::{load_history, render_text};

    #[tokio::test]
    async fn unknown_request_maps_to_not_found() {
        let repository = InMemoryRequestRepository::default();
        let error = load_history(&repository, &RequestId("REQ-missing".to_owned()))
            .await
            .expect_err("missing request");

        assert_eq!(error.0, "not_found");
        assert_eq!(error.2, 6);
    }

    #[tokio::test]
    async fn submitted_request_renders_raised_by_line() {
        let now = Utc::now();
        let hierarchy = HierarchyManager::default()
            .default_skeleton(
                HierarchyId::generate(),
                HierarchyKey::import_scope("import_payment", "foreign"),
                now,
            )
            .expect("skeleton");
        let requester = ApproverRef::new("u-1", "Rae", "rae@corp.example").expect("requester");
        let mut request = RequestInstance::draft(
            hierarchy.id.clone(),
            RequestKind::ImportPayment,
            requester.clone(),
            serde_json::json!({"amount": "1200"}),
            now,
        );
        WorkflowEngine::<SequentialResolver>::default()
            .submit(&mut request, &hierarchy, &requester.id, now)
            .expect("submit");

        let repository = InMemoryRequestRepository::default();
        let id = request.id.clone();
        repository.save(request).await.expect("save");

        let history = load_history(&repository, &id).await.expect("history");
        let text = render_text(&id, &history);
        assert!(text.contains("Raised By"), "{text}");
        assert!(text.contains("by u-1"), "{text}");
    }
}
