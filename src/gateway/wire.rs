//! Backend wire format: response bodies → typed values.
//!
//! The backend is loose about its JSON. Status bodies use either `state` or
//! `status` for the tag, put results under `result` or `meta`, and report
//! errors in three different places. Every parser here works on
//! `serde_json::Value` and tolerates both spellings.

use crate::error::ClientError;
use crate::job::{JobKind, JobRef, JobStatus, Payload};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

// ── Endpoints ────────────────────────────────────────────────────────────

pub const UPLOAD: &str = "/upload-e-processar-pdf/";
pub const MERGE: &str = "/merge_pdfs/";
pub const SEND: &str = "/send-xml-to-external-api/";
pub const BALANCE: &str = "/credits/balance/";
pub const LOGIN: &str = "/auth/login/";
pub const REFRESH: &str = "/auth/refresh/";
pub const VERIFY: &str = "/auth/verify/";
pub const LOGOUT: &str = "/auth/logout/";

pub fn task_status(id: &str) -> String {
    format!("/task-status/{id}/")
}

pub fn download_zip(handle: &str) -> String {
    format!("/download-zip/{handle}/")
}

/// Join a base URL and an endpoint path without doubling the slash.
pub fn url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

pub(crate) fn network_error(endpoint: &str, e: reqwest::Error) -> ClientError {
    let detail = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    };
    ClientError::Network {
        endpoint: endpoint.to_string(),
        detail,
    }
}

/// Human-readable message from an error body: `detail`, `error` or
/// `message` when the body is JSON, otherwise the (truncated) raw text.
pub fn error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error", "message", "error_message"] {
            if let Some(msg) = v.get(key).and_then(value_text) {
                return msg;
            }
        }
    }
    truncate(body.trim(), 300)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}\u{2026}")
    }
}

/// Strings as-is, numbers stringified, everything else rejected.
fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Status ───────────────────────────────────────────────────────────────

/// Map a `/task-status/` body to a [`JobStatus`].
///
/// Bodies that are not JSON, or carry an unrecognised tag, become
/// [`JobStatus::Unknown`] so the engine keeps polling.
pub fn parse_status(body: &str) -> JobStatus {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return JobStatus::Unknown(truncate(body.trim(), 200));
    };
    let tag = v
        .get("state")
        .or_else(|| v.get("status"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_uppercase();

    match tag.as_str() {
        "PENDING" | "RECEIVED" => JobStatus::Pending,
        "STARTED" | "PROGRESS" => JobStatus::Started,
        "RETRY" => JobStatus::Retry,
        "SUCCESS" => JobStatus::Success(parse_payload(&v)),
        "FAILURE" | "REVOKED" => JobStatus::Failure(failure_reason(&v)),
        "" => JobStatus::Unknown(truncate(body.trim(), 200)),
        _ => JobStatus::Unknown(tag),
    }
}

/// The `result` and `meta` objects of a status body, in lookup order.
fn sections(v: &Value) -> Vec<&Value> {
    ["result", "meta"]
        .iter()
        .filter_map(|k| v.get(*k))
        .filter(|s| s.is_object())
        .collect()
}

fn lookup<'a>(sections: &[&'a Value], key: &str) -> Option<&'a Value> {
    sections.iter().find_map(|s| s.get(key)).filter(|v| !v.is_null())
}

fn failure_reason(v: &Value) -> String {
    let secs = sections(v);
    ["error_message", "error"]
        .iter()
        .find_map(|k| v.get(*k).and_then(value_text))
        .or_else(|| {
            ["error", "exc_message", "message"]
                .iter()
                .find_map(|k| lookup(&secs, k).and_then(value_text))
        })
        .or_else(|| v.get("result").and_then(value_text))
        .unwrap_or_else(|| "backend reported FAILURE without a reason".to_string())
}

/// Resolve the payload shape of a `SUCCESS` body.
///
/// Lookup order: inline file map, embedded zip, merged document, download
/// handle, external receipt. A body with none of these is an empty inline
/// map, which the decoder rejects as an empty container.
pub fn parse_payload(v: &Value) -> Payload {
    let secs = sections(v);
    let download_handle = lookup(&secs, "zip_id").and_then(value_text);

    let inline = lookup(&secs, "arquivos_resultado").or_else(|| lookup(&secs, "files"));
    if let Some(Value::Object(map)) = inline {
        let files: BTreeMap<String, Value> =
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        return Payload::Inline {
            files,
            download_handle,
            warnings: warnings(&secs),
        };
    }

    if let Some(data) = lookup(&secs, "zip_bytes").and_then(Value::as_str) {
        return Payload::Archive {
            data: data.to_string(),
        };
    }

    if let Some(data) = lookup(&secs, "merged_pdf_bytes").and_then(Value::as_str) {
        return Payload::Document {
            filename: lookup(&secs, "output_filename")
                .or_else(|| lookup(&secs, "filename"))
                .and_then(value_text),
            data: data.to_string(),
        };
    }

    if let Some(handle) = download_handle {
        return Payload::Reference { handle };
    }

    if let Some(uuid) = lookup(&secs, "uuid").and_then(value_text) {
        return Payload::Receipt {
            uuid: Some(uuid),
            message: lookup(&secs, "message").and_then(value_text),
        };
    }

    Payload::Inline {
        files: BTreeMap::new(),
        download_handle: None,
        warnings: warnings(&secs),
    }
}

/// Backend-reported per-file problems (`erros`).
fn warnings(secs: &[&Value]) -> Vec<String> {
    match lookup(secs, "erros").or_else(|| lookup(secs, "errors")) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| value_text(i).unwrap_or_else(|| i.to_string()))
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", value_text(v).unwrap_or_else(|| v.to_string())))
            .collect(),
        Some(other) => value_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

// ── Submission ───────────────────────────────────────────────────────────

/// What the backend acknowledged for one upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub job_refs: Vec<JobRef>,
    pub credits_used: u64,
    pub files_count: usize,
}

pub fn parse_submit(body: &str) -> Result<SubmitReceipt, ClientError> {
    let v: Value = serde_json::from_str(body).map_err(|e| malformed(UPLOAD, e))?;

    if v.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(ClientError::Backend {
            status: 200,
            message: error_message(body),
        });
    }

    let mut ids: Vec<String> = match v.get("task_ids") {
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
        _ => Vec::new(),
    };
    if ids.is_empty() {
        ids.extend(v.get("task_id").and_then(value_text));
    }
    if ids.is_empty() {
        return Err(ClientError::MalformedResponse {
            endpoint: UPLOAD.to_string(),
            detail: "no task_id in response".into(),
        });
    }

    Ok(SubmitReceipt {
        job_refs: ids
            .into_iter()
            .map(|id| JobRef::new(id, JobKind::Extraction))
            .collect(),
        credits_used: v.get("credits_used").and_then(Value::as_u64).unwrap_or(0),
        files_count: v
            .get("files_count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(0),
    })
}

/// `{task_id}` body of the merge and send endpoints.
pub fn parse_task_id(endpoint: &str, body: &str) -> Result<String, ClientError> {
    let v: Value = serde_json::from_str(body).map_err(|e| malformed(endpoint, e))?;
    v.get("task_id")
        .and_then(value_text)
        .ok_or_else(|| ClientError::MalformedResponse {
            endpoint: endpoint.to_string(),
            detail: "no task_id in response".into(),
        })
}

/// How the external API acknowledged a document.
#[derive(Debug, Clone, PartialEq)]
pub enum SendSubmission {
    /// Queued as a backend job that must be polled.
    Queued(JobRef),
    /// Accepted synchronously.
    Delivered(Payload),
    /// Refused synchronously.
    Rejected(String),
}

pub fn parse_send(body: &str) -> Result<SendSubmission, ClientError> {
    let v: Value = serde_json::from_str(body).map_err(|e| malformed(SEND, e))?;
    if let Some(id) = v.get("task_id").and_then(value_text) {
        return Ok(SendSubmission::Queued(JobRef::new(id, JobKind::Send)));
    }
    match v.get("status").and_then(Value::as_str) {
        Some(s) if s.eq_ignore_ascii_case("success") => Ok(SendSubmission::Delivered(
            Payload::Receipt {
                uuid: v.get("uuid").and_then(value_text),
                message: v.get("message").and_then(value_text),
            },
        )),
        Some(_) => Ok(SendSubmission::Rejected(error_message(body))),
        None => Err(ClientError::MalformedResponse {
            endpoint: SEND.to_string(),
            detail: "neither task_id nor status in response".into(),
        }),
    }
}

// ── Auth & credits ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenPair {
    #[serde(alias = "access")]
    pub access_token: String,
    #[serde(default, alias = "refresh")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WrappedTokens {
    tokens: TokenPair,
    #[serde(default)]
    user: Option<Value>,
}

/// Login/refresh body: `{tokens: {...}, user}` or a bare token pair.
pub fn parse_tokens(endpoint: &str, body: &str) -> Result<(TokenPair, Option<Value>), ClientError> {
    if let Ok(w) = serde_json::from_str::<WrappedTokens>(body) {
        return Ok((w.tokens, w.user));
    }
    serde_json::from_str::<TokenPair>(body)
        .map(|t| (t, None))
        .map_err(|e| malformed(endpoint, e))
}

pub fn parse_balance(body: &str) -> Result<u64, ClientError> {
    let v: Value = serde_json::from_str(body).map_err(|e| malformed(BALANCE, e))?;
    ["balance", "current_balance", "credits"]
        .iter()
        .find_map(|k| v.get(*k))
        .and_then(|n| n.as_i64().map(|i| i.max(0) as u64).or_else(|| n.as_u64()))
        .ok_or_else(|| ClientError::MalformedResponse {
            endpoint: BALANCE.to_string(),
            detail: "no balance field in response".into(),
        })
}

fn malformed(endpoint: &str, e: serde_json::Error) -> ClientError {
    ClientError::MalformedResponse {
        endpoint: endpoint.to_string(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_tags_accept_state_or_status() {
        assert_eq!(parse_status(r#"{"state":"PENDING"}"#), JobStatus::Pending);
        assert_eq!(parse_status(r#"{"status":"started"}"#), JobStatus::Started);
        assert_eq!(parse_status(r#"{"state":"RETRY"}"#), JobStatus::Retry);
    }

    #[test]
    fn non_json_status_is_unknown() {
        match parse_status("<html>502 Bad Gateway</html>") {
            JobStatus::Unknown(raw) => assert!(raw.contains("502")),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn unrecognised_tag_is_unknown() {
        assert_eq!(
            parse_status(r#"{"state":"QUEUED_SOMEWHERE"}"#),
            JobStatus::Unknown("QUEUED_SOMEWHERE".into())
        );
    }

    #[test]
    fn failure_reason_sources() {
        assert_eq!(
            parse_status(r#"{"state":"FAILURE","error_message":"parse error"}"#),
            JobStatus::Failure("parse error".into())
        );
        assert_eq!(
            parse_status(r#"{"state":"FAILURE","meta":{"error":"bad pdf"}}"#),
            JobStatus::Failure("bad pdf".into())
        );
        match parse_status(r#"{"state":"FAILURE"}"#) {
            JobStatus::Failure(reason) => assert!(reason.contains("without a reason")),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn success_with_inline_map_and_handle() {
        let body = json!({
            "state": "SUCCESS",
            "meta": {
                "arquivos_resultado": {"a.pdf": "<nfe/>", "b.pdf": "<nfe/>"},
                "zip_id": "z-1",
                "erros": ["c.pdf: sem chave de acesso"]
            }
        })
        .to_string();
        match parse_status(&body) {
            JobStatus::Success(Payload::Inline {
                files,
                download_handle,
                warnings,
            }) => {
                assert_eq!(files.len(), 2);
                assert_eq!(download_handle.as_deref(), Some("z-1"));
                assert_eq!(warnings, vec!["c.pdf: sem chave de acesso".to_string()]);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn success_payload_variants() {
        assert_eq!(
            parse_payload(&json!({"result": {"zip_bytes": "UEsDBA=="}})),
            Payload::Archive {
                data: "UEsDBA==".into()
            }
        );
        assert_eq!(
            parse_payload(&json!({"meta": {"zip_id": 42}})),
            Payload::Reference {
                handle: "42".into()
            }
        );
        assert_eq!(
            parse_payload(&json!({"result": {"merged_pdf_bytes": "JVBERg==", "output_filename": "all.pdf"}})),
            Payload::Document {
                filename: Some("all.pdf".into()),
                data: "JVBERg==".into()
            }
        );
        assert_eq!(
            parse_payload(&json!({"result": {"uuid": "u-9", "message": "ok"}})),
            Payload::Receipt {
                uuid: Some("u-9".into()),
                message: Some("ok".into())
            }
        );
    }

    #[test]
    fn submit_accepts_single_or_many_ids() {
        let one = parse_submit(r#"{"success":true,"task_id":"t1","credits_used":3,"files_count":3}"#)
            .unwrap();
        assert_eq!(one.job_refs.len(), 1);
        assert_eq!(one.job_refs[0].id, "t1");
        assert_eq!(one.credits_used, 3);

        let many = parse_submit(r#"{"task_ids":["t1","t2"],"files_count":2}"#).unwrap();
        assert_eq!(many.job_refs.len(), 2);
        assert!(many.job_refs.iter().all(|r| r.kind == JobKind::Extraction));
    }

    #[test]
    fn submit_success_false_is_backend_error() {
        let err = parse_submit(r#"{"success":false,"error":"créditos insuficientes"}"#).unwrap_err();
        match err {
            ClientError::Backend { message, .. } => assert_eq!(message, "créditos insuficientes"),
            other => panic!("{other}"),
        }
    }

    #[test]
    fn submit_without_id_is_malformed() {
        assert!(matches!(
            parse_submit(r#"{"success":true}"#),
            Err(ClientError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn send_variants() {
        assert!(matches!(
            parse_send(r#"{"task_id":"s1"}"#).unwrap(),
            SendSubmission::Queued(r) if r.kind == JobKind::Send
        ));
        assert!(matches!(
            parse_send(r#"{"status":"success","uuid":"u1"}"#).unwrap(),
            SendSubmission::Delivered(Payload::Receipt { .. })
        ));
        assert_eq!(
            parse_send(r#"{"status":"error","error":"duplicada"}"#).unwrap(),
            SendSubmission::Rejected("duplicada".into())
        );
    }

    #[test]
    fn error_message_prefers_detail() {
        assert_eq!(error_message(r#"{"detail":"Token expired"}"#), "Token expired");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn tokens_wrapped_or_flat() {
        let (t, user) = parse_tokens(
            LOGIN,
            r#"{"tokens":{"access_token":"a","refresh_token":"r"},"user":{"id":1}}"#,
        )
        .unwrap();
        assert_eq!(t.access_token, "a");
        assert_eq!(t.refresh_token.as_deref(), Some("r"));
        assert!(user.is_some());

        let (t, _) = parse_tokens(REFRESH, r#"{"access":"a2"}"#).unwrap();
        assert_eq!(t.access_token, "a2");
        assert!(t.refresh_token.is_none());
    }

    #[test]
    fn balance_clamps_negative() {
        assert_eq!(parse_balance(r#"{"balance":12}"#).unwrap(), 12);
        assert_eq!(parse_balance(r#"{"credits":-4}"#).unwrap(), 0);
        assert!(parse_balance(r#"{}"#).is_err());
    }

    #[test]
    fn url_join() {
        assert_eq!(url("http://h:8000/", UPLOAD), "http://h:8000/upload-e-processar-pdf/");
        assert_eq!(url("http://h", &task_status("t1")), "http://h/task-status/t1/");
    }
}
