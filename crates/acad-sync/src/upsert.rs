use acad_core::{MutationAction, MutationPayload};
use acad_storage::{MutationError, MutationResponse, MutationSink};
use tracing::info;

const NOT_FOUND_CODE: &str = "NOT_FOUND";

/// How an `update` round trip ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(MutationResponse),
    /// The keyed row does not exist remotely.
    NotFound(MutationResponse),
    Failed(MutationResponse),
}

impl UpdateOutcome {
    pub fn classify(response: MutationResponse) -> Self {
        if response.is_success() {
            return Self::Updated(response);
        }
        let coded = response
            .code
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(NOT_FOUND_CODE));
        let worded = response
            .message
            .as_deref()
            .is_some_and(|m| m.to_ascii_lowercase().contains("not found"));
        if coded || worded {
            Self::NotFound(response)
        } else {
            Self::Failed(response)
        }
    }
}

/// Submit `payload`; an `update` that reports a missing row is retried once as
/// an unkeyed `add`, and that result is what the caller sees.
pub async fn upsert(
    sink: &dyn MutationSink,
    payload: &MutationPayload,
) -> Result<MutationResponse, MutationError> {
    if payload.action != MutationAction::Update {
        return sink.submit(payload).await;
    }

    match UpdateOutcome::classify(sink.submit(payload).await?) {
        UpdateOutcome::Updated(resp) | UpdateOutcome::Failed(resp) => Ok(resp),
        UpdateOutcome::NotFound(resp) => {
            info!(
                table = %payload.target_table,
                remote = resp.message.as_deref().unwrap_or_default(),
                "update target missing; adding instead"
            );
            let add = MutationPayload {
                action: MutationAction::Add,
                key_column: None,
                key_value: None,
                ..payload.clone()
            };
            sink.submit(&add).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use acad_core::RawRow;
    use acad_storage::MutationResult;
    use async_trait::async_trait;

    use super::*;

    /// Replays canned responses and records what was submitted.
    struct ScriptedSink {
        responses: Mutex<Vec<MutationResponse>>,
        seen: Mutex<Vec<MutationPayload>>,
    }

    impl ScriptedSink {
        fn new(mut responses: Vec<MutationResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MutationSink for ScriptedSink {
        async fn submit(&self, payload: &MutationPayload) -> Result<MutationResponse, MutationError> {
            self.seen.lock().unwrap().push(payload.clone());
            Ok(self.responses.lock().unwrap().pop().expect("scripted response"))
        }
    }

    fn response(result: MutationResult, message: Option<&str>, code: Option<&str>) -> MutationResponse {
        MutationResponse {
            result,
            message: message.map(str::to_string),
            code: code.map(str::to_string),
        }
    }

    fn update() -> MutationPayload {
        MutationPayload::new(
            MutationAction::Update,
            "Teachers",
            RawRow::from_pairs([("Employee ID", "710-001"), ("Name", "Dr. Ayesha")]),
        )
        .keyed("Employee ID", "710-001")
    }

    #[tokio::test]
    async fn not_found_update_falls_back_to_unkeyed_add() {
        let sink = ScriptedSink::new(vec![
            response(MutationResult::Error, Some("Row with key 710-001 Not Found"), None),
            response(MutationResult::Success, None, None),
        ]);

        let resp = upsert(&sink, &update()).await.unwrap();

        assert!(resp.is_success());
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].action, MutationAction::Add);
        assert_eq!(seen[1].key_column, None);
        assert_eq!(seen[1].key_value, None);
        assert_eq!(seen[1].record, seen[0].record);
    }

    #[tokio::test]
    async fn other_errors_are_returned_verbatim() {
        let sink = ScriptedSink::new(vec![response(MutationResult::Error, Some("sheet locked"), None)]);
        let resp = upsert(&sink, &update()).await.unwrap();
        assert_eq!(resp.message.as_deref(), Some("sheet locked"));
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn structured_code_wins_over_message() {
        let outcome = UpdateOutcome::classify(response(MutationResult::Error, Some("missing"), Some("not_found")));
        assert!(matches!(outcome, UpdateOutcome::NotFound(_)));
        let outcome = UpdateOutcome::classify(response(MutationResult::Success, Some("not found"), None));
        assert!(matches!(outcome, UpdateOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn adds_and_deletes_pass_straight_through() {
        let sink = ScriptedSink::new(vec![response(MutationResult::Success, None, None)]);
        let delete = MutationPayload::new(MutationAction::Delete, "Teachers", RawRow::new()).keyed("Employee ID", "1");
        assert!(upsert(&sink, &delete).await.unwrap().is_success());
        assert_eq!(sink.seen.lock().unwrap()[0].action, MutationAction::Delete);
    }
}
