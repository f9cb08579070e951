//! Status-code acceptance sets.

use serde::{Deserialize, Serialize};

/// Which status codes count as success.
///
/// A response outside the set fails the request with
/// `NetError::StatusCodeRejected`, which advances the fallback chain like
/// any other failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    /// 2xx.
    #[default]
    SuccessCodes,
    /// 2xx and 3xx.
    SuccessAndRedirectCodes,
    /// Exactly the listed codes.
    CustomCodes(Vec<u16>),
}

impl ValidationType {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            ValidationType::SuccessCodes => (200..300).contains(&status),
            ValidationType::SuccessAndRedirectCodes => (200..400).contains(&status),
            ValidationType::CustomCodes(codes) => codes.contains(&status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert!(ValidationType::SuccessCodes.accepts(200));
        assert!(ValidationType::SuccessCodes.accepts(299));
        assert!(!ValidationType::SuccessCodes.accepts(304));
        assert!(ValidationType::SuccessAndRedirectCodes.accepts(304));
        assert!(!ValidationType::SuccessAndRedirectCodes.accepts(404));
    }

    #[test]
    fn test_custom_codes() {
        let v = ValidationType::CustomCodes(vec![200, 404]);
        assert!(v.accepts(404));
        assert!(!v.accepts(201));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ValidationType::SuccessAndRedirectCodes).unwrap();
        assert_eq!(json, "\"success_and_redirect_codes\"");
        let custom: ValidationType = serde_json::from_str(r#"{"custom_codes":[201]}"#).unwrap();
        assert_eq!(custom, ValidationType::CustomCodes(vec![201]));
    }
}
