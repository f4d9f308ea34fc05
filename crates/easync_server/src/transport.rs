//! The boundary between an HTTP front end and the sync core.

/// Media type of ActiveSync request and response bodies.
pub const WBXML_CONTENT_TYPE: &str = "application/vnd.ms-sync.wbxml";

/// A request as handed over by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    /// Raw request body.
    pub body: Vec<u8>,
    /// Device the request came from.
    pub device_id: String,
    /// Collection named by the request URL, if any. When set, every
    /// collection in the body must match it.
    pub collection_id: Option<String>,
    /// HTTP headers, names in any case.
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    /// Creates a request without headers.
    pub fn new(device_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            body,
            device_id: device_id.into(),
            collection_id: None,
            headers: Vec::new(),
        }
    }

    /// Sets the URL collection.
    pub fn with_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the HTTP layer sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// Response body; empty for non-200 statuses.
    pub body: Vec<u8>,
    /// HTTP status code.
    pub status: u16,
}

impl TransportResponse {
    /// A 200 response with a WBXML body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { body, status: 200 }
    }

    /// An error response without body.
    pub fn error(status: u16) -> Self {
        Self {
            body: Vec::new(),
            status,
        }
    }

    /// True for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_match_case_insensitively() {
        let request = TransportRequest::new("dev", Vec::new())
            .with_header("Content-Type", WBXML_CONTENT_TYPE)
            .with_header("MS-ASProtocolVersion", "14.1");
        assert_eq!(request.header("content-type"), Some(WBXML_CONTENT_TYPE));
        assert_eq!(request.header("ms-asprotocolversion"), Some("14.1"));
        assert_eq!(request.header("X-Missing"), None);
    }

    #[test]
    fn response_constructors() {
        assert!(TransportResponse::ok(vec![1]).is_success());
        let err = TransportResponse::error(503);
        assert!(!err.is_success());
        assert!(err.body.is_empty());
    }
}
