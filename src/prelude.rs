use anyhow::Result;
use actix_web::HttpRequest;
use qstring::QString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::err;

pub(crate) trait HttpRequestExtensions {
    /// Gets a specific header from the current request.
    ///
    /// If the requested header does not exist in the current request or is not valid utf-8, returns `None`.
    /// This method does not allocate but instead returns a `&str`.
    fn get_header<S: AsRef<str>>(&self, header: S) -> Option<&str>;

    /// Gets a [QString](qstring::QString) built from the current request.
    ///
    /// This function is a shorthand for `QString::from(request.query_string())`. It is
    /// guaranteed to not fail or panic. If no query string was sent with the request,
    /// an empty QString struct is returned. This method will always allocate.
    fn q_string(&self) -> QString;

    /// Returns the bearer token of the current request, if one was sent.
    ///
    /// # Example
    ///
    /// ```
    /// # let request = actix_web::test::TestRequest::default()
    /// #     .insert_header(("authorization", "Bearer deadbeef"))
    /// #     .to_http_request();
    ///
    /// use crate::prelude::*;
    ///
    /// assert_eq!(request.bearer_token(), Some("deadbeef"));
    /// ```
    fn bearer_token(&self) -> Option<&str>;
}

impl HttpRequestExtensions for HttpRequest {
    fn get_header<S: AsRef<str>>(&self, header: S) -> Option<&str> {
        self.headers().get(header.as_ref())?.to_str().ok()
    }

    fn q_string(&self) -> QString {
        QString::from(self.query_string())
    }

    fn bearer_token(&self) -> Option<&str> {
        self.get_header("authorization")?.strip_prefix("Bearer ")
    }
}

/// Parses a query or path string into one of the serde enums (issue status, priority, type, ...)
/// by round-tripping it through its serde identifier.
pub(crate) fn parse_enum<T: DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_value(Value::String(value.to_owned()))
        .map_err(|_| err!(BAD_REQUEST, format!("Invalid filter value `{}`", value)))
}

/// Deserializes into the inner level of a double `Option`, turning an explicit `null`
/// into `Some(None)`. Combined with `#[serde(default)]` this lets merge-patch bodies
/// distinguish "field absent, leave untouched" from "field null, clear it".
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where T: Deserialize<'de>,
          D: Deserializer<'de>
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::test::TestRequest;

    #[test]
    fn bearer_token_is_stripped_from_the_authorization_header() {
        let request = TestRequest::default()
            .insert_header(("authorization", "Bearer deadbeef"))
            .to_http_request();

        assert_eq!(request.bearer_token(), Some("deadbeef"));
    }

    #[test]
    fn missing_or_malformed_authorization_headers_yield_no_token() {
        let request = TestRequest::default().to_http_request();
        assert_eq!(request.bearer_token(), None);

        let request = TestRequest::default()
            .insert_header(("authorization", "Basic dXNlcjpwdw=="))
            .to_http_request();
        assert_eq!(request.bearer_token(), None);
    }
}
