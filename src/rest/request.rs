use std::collections::HashMap;

use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Put => "PUT",
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// One outbound request: method, absolute URL, optional query parameters,
/// optional JSON body, and caller-supplied extra headers.
/// Value-like and shallow-copyable so a `GatewayResponse` can enrich `data`
/// without mutating the original envelope.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub method: HttpMethod,
    pub url: Url,
    pub params: Option<Map<String, Value>>,
    pub body: Option<Value>,
    pub extra_headers: HashMap<String, String>,
}

impl RequestEnvelope {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            params: None,
            body: None,
            extra_headers: HashMap::new(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    /// Query parameters with null-valued entries elided recursively,
    /// stringified for use as a `reqwest` query map.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.params {
            None => Vec::new(),
            Some(map) => {
                let elided = elide_nulls(Value::Object(map.clone()));
                match elided {
                    Value::Object(m) => m.into_iter().map(|(k, v)| (k, scalar_to_query_string(&v))).collect(),
                    _ => Vec::new(),
                }
            }
        }
    }

    /// The JSON body with null-valued entries elided recursively.
    pub fn elided_body(&self) -> Option<Value> {
        self.body.clone().map(elide_nulls)
    }
}

fn scalar_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Recursively removes null-valued entries from objects (and from objects
/// nested in arrays). The value sent on the wire equals the input with
/// null-valued entries removed; order of remaining keys is not observable
/// externally.
pub fn elide_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                out.insert(k, elide_nulls(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(elide_nulls).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn elide_nulls_removes_top_level_nulls() {
        let input = json!({"a": 1, "b": null, "c": "keep"});
        let expected = json!({"a": 1, "c": "keep"});
        assert_eq!(elide_nulls(input), expected);
    }

    #[test]
    fn elide_nulls_recurses_into_nested_objects_and_arrays() {
        let input = json!({
            "a": {"x": null, "y": 2},
            "b": [{"z": null, "w": 3}, null, 5]
        });
        let expected = json!({
            "a": {"y": 2},
            "b": [{"w": 3}, null, 5]
        });
        assert_eq!(elide_nulls(input), expected);
    }

    #[test]
    fn elide_nulls_is_idempotent() {
        let input = json!({"a": {"b": null, "c": [1, null, {"d": null, "e": 2}]}});
        let once = elide_nulls(input);
        let twice = elide_nulls(once.clone());
        assert_eq!(once, twice);
    }
}
