//! `MockConfiguration` and `Expectation`: the typed view of a MockServer expectations file.
//!
//! Expectations arrive from an external collaborator (the AI-assisted
//! generator, or a hand-written import) in any of several equivalent
//! shapes; [`normalise_expectations`] canonicalises them into the strict
//! form the store always writes. Re-running normalisation on already
//! canonical data is a no-op.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockMetadata {
    /// `"v" + unix_seconds`, monotonically increasing across updates.
    pub version: String,
    /// Preserved across updates — copied from the prior current config.
    pub created_at: u64,
    pub updated_at: u64,
    /// Serialised byte length of the whole `MockConfiguration`.
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockConfiguration {
    pub metadata: MockMetadata,
    pub expectations: Vec<Expectation>,
    #[serde(default)]
    pub settings: Value,
}

impl MockConfiguration {
    /// Number of expectations — used by the validator.
    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    pub http_request: HttpRequest,
    pub http_response: HttpResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<Times>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Times {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlimited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_times: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HeaderItem {
    Regex { regex: String },
    Plain(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string_parameters: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Vec<HeaderItem>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub json: Value,
    pub match_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: i64,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: ResponseBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Kept raw because it contains a `$!` templating marker.
    Raw(String),
    /// Wrapped `{type:"JSON", json:<stringified>}`.
    Json(String),
}

impl Serialize for ResponseBody {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            ResponseBody::Raw(s) => serializer.serialize_str(s),
            ResponseBody::Json(json) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "JSON")?;
                map.serialize_entry("json", json)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ResponseBody {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        match v {
            Value::String(s) => Ok(ResponseBody::Raw(s)),
            Value::Object(mut map) => {
                let json = map
                    .remove("json")
                    .and_then(|j| j.as_str().map(str::to_string))
                    .ok_or_else(|| serde::de::Error::custom("expected string `json` field"))?;
                Ok(ResponseBody::Json(json))
            }
            other => Err(serde::de::Error::custom(format!(
                "unexpected httpResponse.body shape: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delay {
    pub time_unit: String,
    pub value: i64,
}

/// Normalises a batch of raw, externally-sourced expectation JSON values
/// into the canonical [`Expectation`] form the store persists.
pub fn normalise_expectations(raw: &[Value]) -> Result<Vec<Expectation>> {
    raw.iter().map(normalise_one).collect()
}

fn normalise_one(raw: &Value) -> Result<Expectation> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation("expectation", "must be a JSON object"))?;

    let req_raw = obj
        .get("httpRequest")
        .ok_or_else(|| Error::validation("httpRequest", "is required"))?;
    let resp_raw = obj
        .get("httpResponse")
        .ok_or_else(|| Error::validation("httpResponse", "is required"))?;

    let http_request = normalise_request(req_raw)?;
    let http_response = normalise_response(resp_raw)?;

    let times = obj
        .get("times")
        .map(|t| serde_json::from_value::<Times>(t.clone()))
        .transpose()
        .map_err(|e| Error::validation("times", e.to_string()))?;

    let priority = obj.get("priority").and_then(Value::as_i64);

    Ok(Expectation {
        http_request,
        http_response,
        times,
        priority,
    })
}

fn normalise_request(raw: &Value) -> Result<HttpRequest> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation("httpRequest", "must be a JSON object"))?;

    if obj.contains_key("name") {
        return Err(Error::validation(
            "httpRequest.name",
            "is forbidden on stored expectations",
        ));
    }

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("httpRequest.method", "is required"))?
        .to_string();
    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("httpRequest.path", "is required"))?
        .to_string();

    let query_string_parameters = obj
        .get("queryStringParameters")
        .map(normalise_string_list_map)
        .transpose()?;

    let headers = obj
        .get("headers")
        .map(normalise_request_headers)
        .transpose()?;

    let body = obj.get("body").map(normalise_request_body).transpose()?;

    Ok(HttpRequest {
        method,
        path,
        query_string_parameters,
        headers,
        body,
    })
}

/// Singleton values are coerced to single-element arrays.
fn normalise_string_list_map(raw: &Value) -> Result<BTreeMap<String, Vec<String>>> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation("queryStringParameters", "must be an object"))?;
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        let values = match v {
            Value::Array(items) => items
                .iter()
                .map(|i| i.as_str().unwrap_or_default().to_string())
                .collect(),
            Value::String(s) => vec![s.clone()],
            other => vec![other.to_string()],
        };
        out.insert(k.clone(), values);
    }
    Ok(out)
}

/// Header values: singletons coerced to arrays; `{regex:"…"}` preserved
/// and wrapped in a one-element list.
fn normalise_request_headers(raw: &Value) -> Result<BTreeMap<String, Vec<HeaderItem>>> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation("headers", "must be an object"))?;
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        let items = match v {
            Value::Array(items) => items
                .iter()
                .map(header_item_from_value)
                .collect::<Result<Vec<_>>>()?,
            Value::Object(o) if o.contains_key("regex") => {
                vec![header_item_from_value(v)?]
            }
            Value::String(s) => vec![HeaderItem::Plain(s.clone())],
            other => vec![HeaderItem::Plain(other.to_string())],
        };
        out.insert(k.clone(), items);
    }
    Ok(out)
}

fn header_item_from_value(v: &Value) -> Result<HeaderItem> {
    match v {
        Value::Object(o) => {
            let regex = o
                .get("regex")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("headers", "object header must have `regex`"))?;
            Ok(HeaderItem::Regex {
                regex: regex.to_string(),
            })
        }
        Value::String(s) => Ok(HeaderItem::Plain(s.clone())),
        other => Ok(HeaderItem::Plain(other.to_string())),
    }
}

/// Coerce any non-`{type:JSON,…}` shape into
/// `{type:"JSON", json:<parsed-or-string>, matchType:"ONLY_MATCHING_FIELDS"}`.
fn normalise_request_body(raw: &Value) -> Result<RequestBody> {
    if let Some(obj) = raw.as_object() {
        if obj.get("type").and_then(Value::as_str) == Some("JSON") {
            let json = obj.get("json").cloned().unwrap_or(Value::Null);
            let match_type = obj
                .get("matchType")
                .and_then(Value::as_str)
                .unwrap_or("ONLY_MATCHING_FIELDS")
                .to_string();
            return Ok(RequestBody {
                kind: "JSON".to_string(),
                json,
                match_type,
            });
        }
    }

    // Not already in canonical shape: coerce.
    let json = match raw {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or_else(|_| Value::String(s.clone())),
        other => other.clone(),
    };
    Ok(RequestBody {
        kind: "JSON".to_string(),
        json,
        match_type: "ONLY_MATCHING_FIELDS".to_string(),
    })
}

fn normalise_response(raw: &Value) -> Result<HttpResponse> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation("httpResponse", "must be a JSON object"))?;

    let status_code = obj
        .get("statusCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::validation("httpResponse.statusCode", "is required and must be an integer"))?;

    let headers = obj
        .get("headers")
        .map(normalise_string_list_map)
        .transpose()?
        .unwrap_or_default();

    let body_raw = obj
        .get("body")
        .ok_or_else(|| Error::validation("httpResponse.body", "is required"))?;
    let body = normalise_response_body(body_raw)?;

    let delay = obj.get("delay").map(normalise_delay).transpose()?;

    Ok(HttpResponse {
        status_code,
        headers,
        body,
        delay,
    })
}

fn normalise_response_body(raw: &Value) -> Result<ResponseBody> {
    // Already-canonical form round-trips without re-wrapping (idempotency).
    if let Some(obj) = raw.as_object() {
        if obj.get("type").and_then(Value::as_str) == Some("JSON") {
            if let Some(json) = obj.get("json").and_then(Value::as_str) {
                return Ok(ResponseBody::Json(json.to_string()));
            }
        }
    }

    if let Value::String(s) = raw {
        if s.contains("$!") {
            return Ok(ResponseBody::Raw(s.clone()));
        }
        // Plain string without a templating marker: still wrapped, the
        // stringified form of a JSON string is the quoted literal.
        return Ok(ResponseBody::Json(
            serde_json::to_string(&Value::String(s.clone())).expect("string always serialises"),
        ));
    }

    Ok(ResponseBody::Json(
        serde_json::to_string(raw).map_err(|e| Error::validation("httpResponse.body", e.to_string()))?,
    ))
}

/// `delay.value` must be an integer — string/float values are either
/// coerced (float→int) or rejected.
fn normalise_delay(raw: &Value) -> Result<Delay> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation("delay", "must be an object"))?;
    let time_unit = obj
        .get("timeUnit")
        .and_then(Value::as_str)
        .unwrap_or("MILLISECONDS")
        .to_string();
    let value_raw = obj
        .get("value")
        .ok_or_else(|| Error::validation("delay.value", "is required"))?;
    let value = match value_raw {
        Value::Number(n) if n.is_i64() || n.is_u64() => n.as_i64().unwrap(),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap();
            if f.fract() != 0.0 {
                return Err(Error::validation(
                    "delay.value",
                    "must be an integer, got a non-integral float",
                ));
            }
            f as i64
        }
        _ => {
            return Err(Error::validation(
                "delay.value",
                "must be an integer, strings are rejected",
            ))
        }
    };
    Ok(Delay { time_unit, value })
}

/// Validation rules: non-empty project id, at least one
/// expectation, every expectation has the required fields.
pub fn validate_mock_configuration(project_id: &str, expectations: &[Expectation]) -> Result<()> {
    if project_id.trim().is_empty() {
        return Err(Error::validation("project_id", "must not be empty"));
    }
    if expectations.is_empty() {
        return Err(Error::validation(
            "expectations",
            "must contain at least one expectation",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalises_string_request_body() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/ping", "body": "{\"a\":1}"},
            "httpResponse": {"statusCode": 200, "body": {"ok": true}}
        });
        let exp = normalise_one(&raw).unwrap();
        let body = exp.http_request.body.unwrap();
        assert_eq!(body.kind, "JSON");
        assert_eq!(body.match_type, "ONLY_MATCHING_FIELDS");
        assert_eq!(body.json, json!({"a": 1}));
    }

    #[test]
    fn keeps_templating_response_raw() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/x"},
            "httpResponse": {"statusCode": 200, "body": "$!ctx.x"}
        });
        let exp = normalise_one(&raw).unwrap();
        assert_eq!(exp.http_response.body, ResponseBody::Raw("$!ctx.x".to_string()));
    }

    #[test]
    fn wraps_object_response_body() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/x"},
            "httpResponse": {"statusCode": 200, "body": {"ok": true}}
        });
        let exp = normalise_one(&raw).unwrap();
        match exp.http_response.body {
            ResponseBody::Json(s) => assert_eq!(s, "{\"ok\":true}"),
            other => panic!("expected Json, got {other:?}"),
        }
    }

    #[test]
    fn rejects_forbidden_request_name() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/x", "name": "nope"},
            "httpResponse": {"statusCode": 200, "body": "ok"}
        });
        assert!(normalise_one(&raw).is_err());
    }

    #[test]
    fn rejects_missing_status_code() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/x"},
            "httpResponse": {"body": "ok"}
        });
        assert!(normalise_one(&raw).is_err());
    }

    #[test]
    fn rejects_non_integer_delay() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/x"},
            "httpResponse": {"statusCode": 200, "body": "ok", "delay": {"timeUnit": "MILLISECONDS", "value": "100"}}
        });
        assert!(normalise_one(&raw).is_err());
    }

    #[test]
    fn coerces_float_delay_to_int() {
        let raw = json!({
            "httpRequest": {"method": "GET", "path": "/x"},
            "httpResponse": {"statusCode": 200, "body": "ok", "delay": {"timeUnit": "MILLISECONDS", "value": 100.0}}
        });
        let exp = normalise_one(&raw).unwrap();
        assert_eq!(exp.http_response.delay.unwrap().value, 100);
    }

    #[test]
    fn headers_singleton_coerced_and_regex_preserved() {
        let raw = json!({
            "httpRequest": {
                "method": "GET", "path": "/x",
                "headers": {"X-Trace": "abc", "X-Match": {"regex": "^foo.*"}}
            },
            "httpResponse": {"statusCode": 200, "body": "ok"}
        });
        let exp = normalise_one(&raw).unwrap();
        let headers = exp.http_request.headers.unwrap();
        assert_eq!(headers["X-Trace"], vec![HeaderItem::Plain("abc".to_string())]);
        assert_eq!(
            headers["X-Match"],
            vec![HeaderItem::Regex {
                regex: "^foo.*".to_string()
            }]
        );
    }

    #[test]
    fn normalisation_is_idempotent() {
        let raw = json!({
            "httpRequest": {
                "method": "GET", "path": "/x",
                "queryStringParameters": {"a": "1"}
            },
            "httpResponse": {"statusCode": 200, "body": {"ok": true}},
            "priority": 5
        });
        let once = normalise_one(&raw).unwrap();
        let once_value = serde_json::to_value(&once).unwrap();
        let twice = normalise_one(&once_value).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn validation_rejects_empty_expectations() {
        assert!(validate_mock_configuration("demo", &[]).is_err());
        assert!(validate_mock_configuration("", &[]).is_err());
    }
}
