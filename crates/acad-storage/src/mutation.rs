use std::time::Duration;

use acad_core::{InsertStrategy, MutationPayload, RawRow};
use anyhow::Context;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

use crate::looks_like_html;

/// Body the script endpoint serves for GET; seeing it on a POST means the
/// request was redirected or routed to the wrong handler.
const GET_BANNER: &str = "api is running";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationResult {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub result: MutationResult,
    #[serde(default)]
    pub message: Option<String>,
    /// Machine-readable error code, when the endpoint provides one.
    #[serde(default)]
    pub code: Option<String>,
}

impl MutationResponse {
    pub fn is_success(&self) -> bool {
        self.result == MutationResult::Success
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("mutation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mutation endpoint returned an HTML page ({title}); check the deployment URL and access settings")]
    HtmlResponse { title: String },
    #[error("mutation endpoint answered with its GET banner; the POST did not reach the handler")]
    NotRouted,
    #[error("mutation endpoint returned a non-JSON body (http {status}): {snippet}")]
    InvalidResponse { status: u16, snippet: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationEnvelope<'a> {
    action: &'static str,
    sheet_name: &'a str,
    data: &'a RawRow,
    key_column: Option<&'a str>,
    key_value: Option<&'a str>,
    spreadsheet_id: &'a str,
    insert_method: InsertStrategy,
}

#[async_trait]
pub trait MutationSink: Send + Sync {
    async fn submit(&self, payload: &MutationPayload) -> Result<MutationResponse, MutationError>;
}

#[derive(Debug, Clone)]
pub struct MutationGateway {
    client: reqwest::Client,
    endpoint: String,
    spreadsheet_id: String,
}

impl MutationGateway {
    pub fn new(
        endpoint: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building mutation client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            spreadsheet_id: spreadsheet_id.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MutationSink for MutationGateway {
    async fn submit(&self, payload: &MutationPayload) -> Result<MutationResponse, MutationError> {
        let envelope = MutationEnvelope {
            action: payload.action.as_str(),
            sheet_name: &payload.target_table,
            data: &payload.record,
            key_column: payload.key_column.as_deref(),
            key_value: payload.key_value.as_deref(),
            spreadsheet_id: &self.spreadsheet_id,
            insert_method: payload.insert_strategy,
        };

        let span = info_span!(
            "mutation",
            action = payload.action.as_str(),
            table = %payload.target_table
        );
        async {
            let resp = self.client.post(&self.endpoint).json(&envelope).send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            let parsed = interpret_response(status, &body);
            if let Err(err) = &parsed {
                warn!(error = %err, "mutation endpoint misbehaved");
            }
            parsed
        }
        .instrument(span)
        .await
    }
}

/// Classify a raw endpoint body into an application result or a transport-level error.
pub(crate) fn interpret_response(status: u16, body: &str) -> Result<MutationResponse, MutationError> {
    if let Ok(parsed) = serde_json::from_str::<MutationResponse>(body) {
        return Ok(parsed);
    }

    if looks_like_html(body) {
        return Err(MutationError::HtmlResponse {
            title: html_title(body).unwrap_or_else(|| "untitled page".to_string()),
        });
    }

    if body.to_ascii_lowercase().contains(GET_BANNER) {
        return Err(MutationError::NotRouted);
    }

    Err(MutationError::InvalidResponse {
        status,
        snippet: body.trim().chars().take(200).collect(),
    })
}

fn html_title(body: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_is_an_application_result_not_a_transport_error() {
        let resp = interpret_response(200, r#"{"result":"error","message":"Row not found"}"#)
            .expect("json body");
        assert_eq!(resp.result, MutationResult::Error);
        assert_eq!(resp.message.as_deref(), Some("Row not found"));
        assert!(resp.code.is_none());
    }

    #[test]
    fn html_body_reports_page_title() {
        let err = interpret_response(
            200,
            "<!DOCTYPE html><html><head><title>Sign in - Accounts</title></head></html>",
        )
        .unwrap_err();
        match err {
            MutationError::HtmlResponse { title } => assert_eq!(title, "Sign in - Accounts"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn get_banner_means_post_was_not_routed() {
        let err = interpret_response(200, "API is running").unwrap_err();
        assert!(matches!(err, MutationError::NotRouted));
    }

    #[test]
    fn other_text_is_invalid_response() {
        let err = interpret_response(502, "Bad gateway").unwrap_err();
        match err {
            MutationError::InvalidResponse { status, snippet } => {
                assert_eq!(status, 502);
                assert_eq!(snippet, "Bad gateway");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn envelope_uses_remote_field_names() {
        let record = RawRow::from_pairs([("Course Code", "CSE101")]);
        let envelope = MutationEnvelope {
            action: "update",
            sheet_name: "Sections",
            data: &record,
            key_column: Some("Course Code"),
            key_value: Some("CSE101"),
            spreadsheet_id: "sheet-1",
            insert_method: InsertStrategy::FirstEmpty,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["action"], "update");
        assert_eq!(value["sheetName"], "Sections");
        assert_eq!(value["data"]["Course Code"], "CSE101");
        assert_eq!(value["keyColumn"], "Course Code");
        assert_eq!(value["keyValue"], "CSE101");
        assert_eq!(value["spreadsheetId"], "sheet-1");
        assert_eq!(value["insertMethod"], "first_empty");
    }
}
