//! Request parameter encoding.

use crate::base::neterror::NetError;
use crate::http::RequestBody;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

pub type Parameters = Map<String, Value>;

/// Where request parameters go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterEncoding {
    /// Query string for GET, JSON body for everything else.
    #[default]
    MethodDependent,
    QueryString,
    Json,
}

impl ParameterEncoding {
    /// Applies `parameters` to `url` or to a new body. Empty parameters leave
    /// both untouched.
    pub fn encode(
        self,
        method: &Method,
        url: &mut Url,
        headers: &mut HeaderMap,
        parameters: &Parameters,
    ) -> Result<Option<RequestBody>, NetError> {
        if parameters.is_empty() {
            return Ok(None);
        }
        let as_query = match self {
            ParameterEncoding::MethodDependent => *method == Method::GET,
            ParameterEncoding::QueryString => true,
            ParameterEncoding::Json => false,
        };

        if as_query {
            let mut pairs = Vec::new();
            for (key, value) in parameters {
                flatten_query(key, value, &mut pairs);
            }
            url.query_pairs_mut()
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            Ok(None)
        } else {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
            RequestBody::json(parameters).map(Some)
        }
    }
}

/// Bracket notation for nested values: `a[b]=1`, `list[]=x`. Booleans are
/// `1`/`0`, keys are sorted by the map.
fn flatten_query(key: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (nested, inner) in map {
                flatten_query(&format!("{}[{}]", key, nested), inner, out);
            }
        }
        Value::Array(items) => {
            for inner in items {
                flatten_query(&format!("{}[]", key), inner, out);
            }
        }
        Value::Bool(b) => out.push((key.to_owned(), if *b { "1" } else { "0" }.to_owned())),
        Value::Null => out.push((key.to_owned(), String::new())),
        Value::String(s) => out.push((key.to_owned(), s.clone())),
        Value::Number(n) => out.push((key.to_owned(), n.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_get_goes_to_query() {
        let mut url = Url::parse("https://api.example.com/list?page=1").unwrap();
        let mut headers = HeaderMap::new();
        let body = ParameterEncoding::MethodDependent
            .encode(
                &Method::GET,
                &mut url,
                &mut headers,
                &params(json!({"q": "rust lang", "flag": true})),
            )
            .unwrap();

        assert!(body.is_none());
        assert_eq!(url.query(), Some("page=1&flag=1&q=rust+lang"));
        assert!(headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_post_goes_to_json_body() {
        let mut url = Url::parse("https://api.example.com/users").unwrap();
        let mut headers = HeaderMap::new();
        let body = ParameterEncoding::MethodDependent
            .encode(
                &Method::POST,
                &mut url,
                &mut headers,
                &params(json!({"name": "ann"})),
            )
            .unwrap()
            .unwrap();

        assert_eq!(body.as_bytes(), "{\"name\":\"ann\"}".as_bytes());
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_nested_query() {
        let mut url = Url::parse("https://api.example.com/").unwrap();
        let mut headers = HeaderMap::new();
        ParameterEncoding::QueryString
            .encode(
                &Method::POST,
                &mut url,
                &mut headers,
                &params(json!({"filter": {"ids": [1, 2]}})),
            )
            .unwrap();
        assert_eq!(
            url.query(),
            Some("filter%5Bids%5D%5B%5D=1&filter%5Bids%5D%5B%5D=2")
        );
    }

    #[test]
    fn test_empty_parameters_untouched() {
        let mut url = Url::parse("https://api.example.com/").unwrap();
        let mut headers = HeaderMap::new();
        let body = ParameterEncoding::Json
            .encode(&Method::POST, &mut url, &mut headers, &Parameters::new())
            .unwrap();
        assert!(body.is_none());
        assert!(headers.is_empty());
        assert_eq!(url.as_str(), "https://api.example.com/");
    }
}
