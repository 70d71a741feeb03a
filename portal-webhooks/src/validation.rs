//! Validation of subscription URLs and event sets

use crate::{Result, WebhookError, WebhookEvent};
use std::collections::BTreeSet;

/// Validate a delivery URL: it must parse, use http or https and name a host.
pub fn validate_url(url: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(url.trim())
        .map_err(|_| WebhookError::Validation("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(WebhookError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WebhookError::Validation("URL must have a host".to_string()));
    }

    Ok(parsed)
}

/// Parse a non-empty list of event names into the known enumeration.
///
/// Every unknown name is reported in the error, not only the first.
pub fn parse_events<S: AsRef<str>>(events: &[S]) -> Result<BTreeSet<WebhookEvent>> {
    if events.is_empty() {
        return Err(WebhookError::Validation(
            "At least one event is required".to_string(),
        ));
    }

    let mut parsed = BTreeSet::new();
    let mut invalid = Vec::new();
    for name in events {
        match WebhookEvent::parse(name.as_ref()) {
            Some(event) => {
                parsed.insert(event);
            }
            None => invalid.push(name.as_ref()),
        }
    }

    if !invalid.is_empty() {
        return Err(WebhookError::Validation(format!(
            "Invalid events: {}",
            invalid.join(", ")
        )));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url("https://example.test/hook").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/webhooks?x=1").is_ok());
    }

    #[test]
    fn test_invalid_urls() {
        assert!(validate_url("").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("/relative/path").is_err());
    }

    #[test]
    fn test_disallowed_scheme() {
        let err = validate_url("ftp://example.test/hook").unwrap_err();
        assert!(err.to_string().contains("ftp"));
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_parse_events() {
        let events = parse_events(&["entity.approved", "entity.created", "entity.approved"]).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.contains(&WebhookEvent::EntityApproved));
    }

    #[test]
    fn test_parse_events_empty() {
        let empty: [&str; 0] = [];
        let err = parse_events(&empty).unwrap_err();
        assert!(matches!(err, WebhookError::Validation(_)));
    }

    #[test]
    fn test_parse_events_reports_all_invalid() {
        let err = parse_events(&["entity.created", "order.paid", "user.deleted"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: Invalid events: order.paid, user.deleted"
        );
    }
}
