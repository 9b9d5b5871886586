//! JSON-RPC 2.0 framing shared by the stdio and HTTP channels.

use super::{ProviderError, PROTOCOL_VERSION};
use serde_json::{json, Value};

/// Build a request envelope.
pub(crate) fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a notification envelope (no id, no response expected).
pub(crate) fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Build a response to a server-initiated request.
pub(crate) fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build an error response to a server-initiated request.
pub(crate) fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Parameters for the `initialize` handshake request.
pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// What an incoming frame turned out to be
#[derive(Debug)]
pub(crate) enum Incoming {
    /// Response to one of our requests
    Response { id: u64, outcome: Result<Value, ProviderError> },
    /// Request from the server that needs an answer
    Request { id: Value, method: String },
    /// Notification from the server
    Notification { method: String },
}

/// Classify one decoded JSON-RPC frame.
pub(crate) fn classify(frame: Value) -> Result<Incoming, ProviderError> {
    let method = frame.get("method").and_then(Value::as_str).map(str::to_string);
    let id = frame.get("id").cloned().filter(|id| !id.is_null());

    match (method, id) {
        (Some(method), Some(id)) => Ok(Incoming::Request { id, method }),
        (Some(method), None) => Ok(Incoming::Notification { method }),
        (None, Some(id)) => {
            let id = id
                .as_u64()
                .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| ProviderError::Protocol(format!("unexpected response id {}", id)))?;
            Ok(Incoming::Response {
                id,
                outcome: into_result(frame),
            })
        }
        (None, None) => Err(ProviderError::Protocol(
            "frame has neither method nor id".to_string(),
        )),
    }
}

/// Extract `result` or convert `error` into a [`ProviderError::Rpc`].
pub(crate) fn into_result(mut frame: Value) -> Result<Value, ProviderError> {
    if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ProviderError::Rpc { code, message });
    }

    match frame.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ProviderError::Protocol(
            "response has neither result nor error".to_string(),
        )),
    }
}

/// Pull the JSON payloads out of a `text/event-stream` body.
///
/// Consecutive `data:` lines of one event are joined with newlines; events
/// are separated by blank lines.
pub(crate) fn sse_payloads(body: &str) -> Vec<Value> {
    let mut payloads = Vec::new();
    let mut data = String::new();

    let mut flush = |data: &mut String| {
        if !data.is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(data) {
                payloads.push(value);
            }
            data.clear();
        }
    };

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);

    payloads
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope() {
        let req = request(7, "tools/list", json!({}));
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["id"], 7);
        assert_eq!(req["method"], "tools/list");

        let note = notification("notifications/initialized", json!({}));
        assert!(note.get("id").is_none());
    }

    #[test]
    fn test_classify_response() {
        let frame = json!({"jsonrpc": "2.0", "id": 3, "result": {"tools": []}});
        match classify(frame).unwrap() {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, 3);
                assert_eq!(outcome.unwrap(), json!({"tools": []}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_response() {
        let frame = json!({"jsonrpc": "2.0", "id": 4, "error": {"code": -32601, "message": "Method not found"}});
        match classify(frame).unwrap() {
            Incoming::Response { outcome, .. } => match outcome {
                Err(ProviderError::Rpc { code, message }) => {
                    assert_eq!(code, -32601);
                    assert_eq!(message, "Method not found");
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_messages() {
        match classify(json!({"jsonrpc": "2.0", "id": "a1", "method": "ping"})).unwrap() {
            Incoming::Request { id, method } => {
                assert_eq!(id, json!("a1"));
                assert_eq!(method, "ping");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})).unwrap(),
            Incoming::Notification { method } if method == "notifications/tools/list_changed"
        ));
        assert!(classify(json!({"jsonrpc": "2.0"})).is_err());
    }

    #[test]
    fn test_sse_payloads() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n: keep-alive\n\ndata: not json\n\n";
        let payloads = sse_payloads(body);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["id"], 1);
    }

    #[test]
    fn test_sse_multiline_data() {
        let body = "data: {\"id\": 2,\ndata: \"result\": true}\n\n";
        let payloads = sse_payloads(body);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["result"], true);
    }
}
