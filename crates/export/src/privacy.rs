//! Attribute redaction applied to spans before they leave the process.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::OnceLock;

use loomtrace_core::model::span::{AttrValue, Attributes, Span};
use regex::{Regex, RegexBuilder};

const CREDENTIAL_KEYS: &[&str] = &[
    "password",
    "api_key",
    "token",
    "secret",
    "authorization",
    "access_token",
    "refresh_token",
    "bearer",
    "apikey",
    "client_secret",
    "private_key",
    "ssh_key",
    "aws_secret",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivacyConfig {
    /// Drop attributes whose key looks like a credential.
    pub redact_credentials: bool,
    /// Rewrite emails, phone numbers, SSNs and card numbers in string values.
    pub redact_pii: bool,
    /// Keys exempt from both rules.
    pub allowed_attributes: Vec<String>,
}

impl PrivacyConfig {
    pub fn strict() -> Self {
        Self {
            redact_credentials: true,
            redact_pii: true,
            allowed_attributes: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redact_credentials || self.redact_pii
    }
}

struct PiiPattern {
    regex: Regex,
    marker: &'static str,
}

/// Ordered: email, phone, SSN, card.
fn pii_patterns() -> &'static [PiiPattern] {
    static PATTERNS: OnceLock<Vec<PiiPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
                "[EMAIL_REDACTED]",
            ),
            (r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b", "[PHONE_REDACTED]"),
            (r"\b\d{3}-\d{2}-\d{4}\b", "[SSN_REDACTED]"),
            (
                r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
                "[CARD_REDACTED]",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, marker)| {
            // ASCII `\b` and `\d`: a digit run next to a non-ASCII letter
            // still has a word boundary.
            RegexBuilder::new(pattern)
                .unicode(false)
                .build()
                .map(|regex| PiiPattern { regex, marker })
                .ok()
        })
        .collect()
    })
}

/// Replaces every PII match with its marker. Returns the input borrowed when
/// nothing matched.
pub fn redact_text(input: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(input);
    for pattern in pii_patterns() {
        let replaced = match pattern.regex.replace_all(&out, pattern.marker) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            out = Cow::Owned(replaced);
        }
    }
    out
}

pub fn is_credential_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    if CREDENTIAL_KEYS.contains(&lower.as_str()) {
        return true;
    }
    lower.contains("password")
        || lower.contains("secret")
        || lower.contains("token")
        || (lower.contains("key") && lower.contains("api"))
}

#[derive(Debug, Clone, Default)]
pub struct Redactor {
    redact_credentials: bool,
    redact_pii: bool,
    allowed: HashSet<String>,
}

impl Redactor {
    pub fn new(cfg: &PrivacyConfig) -> Self {
        Self {
            redact_credentials: cfg.redact_credentials,
            redact_pii: cfg.redact_pii,
            allowed: cfg.allowed_attributes.iter().cloned().collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redact_credentials || self.redact_pii
    }

    pub fn redact_span(&self, span: &mut Span) {
        if !self.is_enabled() {
            return;
        }
        self.redact_attributes(span.attributes_mut());
        for event in span.events_mut() {
            self.redact_attributes(&mut event.attributes);
        }
    }

    pub fn redact_attributes(&self, attrs: &mut Attributes) {
        if self.redact_credentials {
            attrs.retain(|key, _| self.allowed.contains(key) || !is_credential_key(key));
        }
        if self.redact_pii {
            for (key, value) in attrs.iter_mut() {
                if self.allowed.contains(key) {
                    continue;
                }
                let AttrValue::String(text) = value else {
                    continue;
                };
                let redacted = match redact_text(text) {
                    Cow::Owned(redacted) => Some(redacted),
                    Cow::Borrowed(_) => None,
                };
                if let Some(redacted) = redacted {
                    *text = redacted;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn credential_attributes_are_removed() {
        let redactor = Redactor::new(&PrivacyConfig {
            redact_credentials: true,
            ..PrivacyConfig::default()
        });
        let mut a = attrs(&[
            ("password", json!("x")),
            ("apikey", json!("y")),
            ("normal", json!("z")),
        ]);
        redactor.redact_attributes(&mut a);
        assert_eq!(a.len(), 1);
        assert!(a.contains_key("normal"));
    }

    #[test]
    fn credential_substring_rule() {
        assert!(is_credential_key("DB_PASSWORD"));
        assert!(is_credential_key("github_token"));
        assert!(is_credential_key("client-secret-v2"));
        assert!(is_credential_key("x-api-key"));
        assert!(is_credential_key("Authorization"));
        assert!(!is_credential_key("keyboard"));
        assert!(!is_credential_key("api_version"));
        assert!(!is_credential_key("llm.model"));
    }

    #[test]
    fn allowlist_exempts_exact_keys() {
        let redactor = Redactor::new(&PrivacyConfig {
            redact_credentials: true,
            redact_pii: true,
            allowed_attributes: vec!["llm.tokens.total".into(), "contact".into()],
        });
        let mut a = attrs(&[
            ("llm.tokens.total", json!(42)),
            ("token_count", json!(42)),
            ("contact", json!("ops@example.com")),
            ("note", json!("mail ops@example.com")),
        ]);
        redactor.redact_attributes(&mut a);
        assert_eq!(a.get("llm.tokens.total"), Some(&json!(42)));
        assert!(!a.contains_key("token_count"));
        assert_eq!(a.get("contact"), Some(&json!("ops@example.com")));
        assert_eq!(a.get("note"), Some(&json!("mail [EMAIL_REDACTED]")));
    }

    #[test]
    fn pii_patterns_are_replaced() {
        let text =
            "reach jane.doe@corp.io or 555-123-4567, ssn 123-45-6789, card 4111 1111 1111 1111";
        let out = redact_text(text);
        assert_eq!(
            out,
            "reach [EMAIL_REDACTED] or [PHONE_REDACTED], ssn [SSN_REDACTED], card [CARD_REDACTED]"
        );
        for leaked in ["jane.doe@corp.io", "555-123-4567", "123-45-6789", "4111 1111"] {
            assert!(!out.contains(leaked), "{leaked} leaked");
        }
    }

    #[test]
    fn pii_next_to_non_ascii_text_is_replaced() {
        let cases = [
            ("Tel:ñ555-123-4567", "Tel:ñ[PHONE_REDACTED]"),
            ("5551234567é", "[PHONE_REDACTED]é"),
            ("ü123-45-6789", "ü[SSN_REDACTED]"),
            ("日本4111-1111-1111-1111", "日本[CARD_REDACTED]"),
            ("連絡:bob@example.com。", "連絡:[EMAIL_REDACTED]。"),
        ];
        for (input, expected) in cases {
            assert_eq!(redact_text(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn non_ascii_digits_are_not_phone_numbers() {
        let text = "٥٥٥-١٢٣-٤٥٦٧";
        assert!(matches!(redact_text(text), Cow::Borrowed(t) if t == text));
    }

    #[test]
    fn clean_text_is_borrowed_unchanged() {
        let text = "order 42 shipped to warehouse 7";
        assert!(matches!(redact_text(text), Cow::Borrowed(t) if t == text));
    }

    #[test]
    fn redaction_is_idempotent() {
        let once = redact_text("call 555.123.4567 now").into_owned();
        let twice = redact_text(&once).into_owned();
        assert_eq!(once, twice);
    }

    #[test]
    fn non_string_values_are_untouched() {
        let redactor = Redactor::new(&PrivacyConfig::strict());
        let mut a = attrs(&[("count", json!(5551234567_i64)), ("ok", json!(true))]);
        redactor.redact_attributes(&mut a);
        assert_eq!(a.get("count"), Some(&json!(5551234567_i64)));
        assert_eq!(a.get("ok"), Some(&json!(true)));
    }

    #[test]
    fn span_events_are_redacted_too() {
        let redactor = Redactor::new(&PrivacyConfig::strict());
        let mut span = Span::new("op", "t", "s", None);
        span.set_attribute("user.email", "a@b.co");
        span.add_event(
            "login",
            attrs(&[("secret_answer", json!("blue")), ("msg", json!("from a@b.co"))]),
        );
        redactor.redact_span(&mut span);

        assert_eq!(span.attribute("user.email"), Some(&json!("[EMAIL_REDACTED]")));
        let event = &span.events()[0];
        assert!(!event.attributes.contains_key("secret_answer"));
        assert_eq!(event.attributes.get("msg"), Some(&json!("from [EMAIL_REDACTED]")));
    }

    #[test]
    fn disabled_redactor_leaves_span_alone() {
        let redactor = Redactor::new(&PrivacyConfig::default());
        let mut span = Span::new("op", "t", "s", None);
        span.set_attribute("password", "hunter2");
        redactor.redact_span(&mut span);
        assert_eq!(span.attribute("password"), Some(&json!("hunter2")));
    }
}
