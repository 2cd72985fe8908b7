//! PII detection and masking over arbitrary nested JSON.
//!
//! Both walks use an explicit stack bounded by `max_depth`. Subtrees at or past
//! the bound are returned untouched by [`PiiEngine::anonymize`] and skipped by
//! [`PiiEngine::detect`].

use crate::config::CompiledConfig;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

pub const DEFAULT_PII_DEPTH: usize = 10;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap()
});

static SSN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static CC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Email,
    Phone,
    Ssn,
    CreditCard,
}

impl PiiCategory {
    /// Scan order. Masking applies the patterns one after another in this order.
    pub const ALL: [PiiCategory; 4] = [
        PiiCategory::Email,
        PiiCategory::Phone,
        PiiCategory::Ssn,
        PiiCategory::CreditCard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PiiCategory::Email => "email",
            PiiCategory::Phone => "phone",
            PiiCategory::Ssn => "ssn",
            PiiCategory::CreditCard => "credit_card",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            PiiCategory::Email => &EMAIL_RE,
            PiiCategory::Phone => &PHONE_RE,
            PiiCategory::Ssn => &SSN_RE,
            PiiCategory::CreditCard => &CC_RE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFinding {
    pub category: PiiCategory,
    pub matched_text: String,
    /// Object key the value sat under, if any.
    pub field_key: Option<String>,
}

/// Keep the first and last character, mask the rest. Two characters or fewer
/// are masked entirely. Length is measured in chars.
pub fn mask_text(text: &str, mask_char: char) -> String {
    let len = text.chars().count();
    if len <= 2 {
        return std::iter::repeat_n(mask_char, len).collect();
    }

    let mut chars = text.chars();
    let first = chars.next().unwrap_or(mask_char);
    let last = chars.next_back().unwrap_or(mask_char);

    let mut masked = String::with_capacity(text.len());
    masked.push(first);
    masked.extend(std::iter::repeat_n(mask_char, len - 2));
    masked.push(last);
    masked
}

/// Every PII pattern match in `text`, in category order.
pub fn scan_text(text: &str) -> Vec<(PiiCategory, String)> {
    PiiCategory::ALL
        .iter()
        .flat_map(|category| {
            category
                .pattern()
                .find_iter(text)
                .map(move |m| (*category, m.as_str().to_string()))
        })
        .collect()
}

pub fn has_pii(text: &str) -> bool {
    PiiCategory::ALL.iter().any(|c| c.pattern().is_match(text))
}

/// Textual form of a JSON value for masking and reporting.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

enum RebuildFrame<'a> {
    Visit(&'a Value, usize),
    Ready(Value),
    Object(Vec<&'a String>),
    Array(usize),
}

enum ScanFrame<'a> {
    Visit(&'a Value, usize),
    Field(&'a String, &'a Value, usize),
}

#[derive(Debug, Clone)]
pub struct PiiEngine {
    enabled: bool,
    sensitive_fields: HashSet<String>,
    mask_char: char,
    max_depth: usize,
}

impl Default for PiiEngine {
    fn default() -> Self {
        Self::new(HashSet::new())
    }
}

impl PiiEngine {
    pub fn new(sensitive_fields: HashSet<String>) -> Self {
        Self {
            enabled: true,
            sensitive_fields: sensitive_fields
                .into_iter()
                .map(|f| f.to_lowercase())
                .collect(),
            mask_char: '*',
            max_depth: DEFAULT_PII_DEPTH,
        }
    }

    pub fn from_config(config: &CompiledConfig) -> Self {
        Self::new(config.sensitive_fields.clone())
            .with_enabled(config.anonymize)
            .with_mask_char(config.mask_char)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_mask_char(mut self, mask_char: char) -> Self {
        self.mask_char = mask_char;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_fields.contains(&key.to_lowercase())
    }

    /// Mask a sensitive field's whole value. `null` stays `null`.
    pub fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            other => Value::String(mask_text(&value_text(other), self.mask_char)),
        }
    }

    /// Mask every PII pattern match inside free text, preserving its length.
    pub fn mask_pii_in_string(&self, text: &str) -> String {
        if !has_pii(text) {
            return text.to_string();
        }

        let mut current = text.to_string();
        for category in PiiCategory::ALL {
            let replaced = category
                .pattern()
                .replace_all(&current, |caps: &Captures| {
                    let masked = mask_text(&caps[0], self.mask_char);
                    debug!("Anonymized {}: {} chars", category.as_str(), masked.len());
                    masked
                })
                .into_owned();
            current = replaced;
        }
        current
    }

    /// Copy of `value` with sensitive fields masked outright and PII patterns
    /// masked inside strings. Returns an unchanged copy when disabled.
    pub fn anonymize(&self, value: &Value) -> Value {
        if !self.enabled {
            return value.clone();
        }
        self.anonymize_at(value, 0)
    }

    pub fn anonymize_at(&self, value: &Value, depth: usize) -> Value {
        let mut stack = vec![RebuildFrame::Visit(value, depth)];
        let mut built: Vec<Value> = Vec::new();

        while let Some(frame) = stack.pop() {
            match frame {
                RebuildFrame::Visit(value, depth) if depth >= self.max_depth => {
                    built.push(value.clone());
                }
                RebuildFrame::Visit(Value::Object(map), depth) => {
                    stack.push(RebuildFrame::Object(map.keys().collect()));
                    for (key, child) in map.iter().rev() {
                        let frame = if self.is_sensitive(key) {
                            RebuildFrame::Ready(self.mask_value(child))
                        } else {
                            match child {
                                Value::Object(_) | Value::Array(_) => {
                                    RebuildFrame::Visit(child, depth + 1)
                                }
                                Value::String(s) => {
                                    RebuildFrame::Ready(Value::String(self.mask_pii_in_string(s)))
                                }
                                other => RebuildFrame::Ready(other.clone()),
                            }
                        };
                        stack.push(frame);
                    }
                }
                RebuildFrame::Visit(Value::Array(items), depth) => {
                    stack.push(RebuildFrame::Array(items.len()));
                    for item in items.iter().rev() {
                        stack.push(RebuildFrame::Visit(item, depth + 1));
                    }
                }
                RebuildFrame::Visit(Value::String(s), _) => {
                    built.push(Value::String(self.mask_pii_in_string(s)));
                }
                RebuildFrame::Visit(scalar, _) => built.push(scalar.clone()),
                RebuildFrame::Ready(value) => built.push(value),
                RebuildFrame::Object(keys) => {
                    let values = built.split_off(built.len() - keys.len());
                    let map: Map<String, Value> = keys.into_iter().cloned().zip(values).collect();
                    built.push(Value::Object(map));
                }
                RebuildFrame::Array(len) => {
                    let items = built.split_off(built.len() - len);
                    built.push(Value::Array(items));
                }
            }
        }

        built.pop().unwrap_or(Value::Null)
    }

    /// Every PII occurrence in document order, without touching the input.
    ///
    /// Strings are scanned with the PII patterns. A sensitive field is also
    /// reported by value, but only under a category whose name appears inside
    /// the lowercased key (`user_email` reports as email, `password` reports
    /// nothing). This is narrower than [`PiiEngine::anonymize`], which masks
    /// every sensitive field.
    pub fn findings(&self, value: &Value) -> Vec<PiiFinding> {
        let mut findings = Vec::new();
        let mut stack = vec![ScanFrame::Visit(value, 0)];

        while let Some(frame) = stack.pop() {
            match frame {
                ScanFrame::Visit(_, depth) if depth >= self.max_depth => {}
                ScanFrame::Visit(Value::Object(map), depth) => {
                    for (key, child) in map.iter().rev() {
                        stack.push(ScanFrame::Field(key, child, depth));
                    }
                }
                ScanFrame::Visit(Value::Array(items), depth) => {
                    for item in items.iter().rev() {
                        stack.push(ScanFrame::Visit(item, depth + 1));
                    }
                }
                ScanFrame::Visit(Value::String(s), _) => {
                    self.scan_into(s, None, &mut findings);
                }
                ScanFrame::Visit(_, _) => {}
                ScanFrame::Field(key, child, depth) => {
                    let lowered = key.to_lowercase();
                    if self.sensitive_fields.contains(&lowered)
                        && is_truthy(child)
                        && let Some(category) = PiiCategory::ALL
                            .into_iter()
                            .find(|c| lowered.contains(c.as_str()))
                    {
                        findings.push(PiiFinding {
                            category,
                            matched_text: value_text(child),
                            field_key: Some(key.clone()),
                        });
                    }

                    match child {
                        Value::String(s) => self.scan_into(s, Some(key), &mut findings),
                        Value::Object(_) | Value::Array(_) => {
                            stack.push(ScanFrame::Visit(child, depth + 1));
                        }
                        _ => {}
                    }
                }
            }
        }

        findings
    }

    /// [`PiiEngine::findings`] grouped by category; empty categories omitted.
    pub fn detect(&self, value: &Value) -> BTreeMap<PiiCategory, Vec<String>> {
        let mut found: BTreeMap<PiiCategory, Vec<String>> = BTreeMap::new();
        for finding in self.findings(value) {
            found
                .entry(finding.category)
                .or_default()
                .push(finding.matched_text);
        }
        found
    }

    fn scan_into(&self, text: &str, field_key: Option<&String>, findings: &mut Vec<PiiFinding>) {
        for (category, matched_text) in scan_text(text) {
            findings.push(PiiFinding {
                category,
                matched_text,
                field_key: field_key.cloned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(fields: &[&str]) -> PiiEngine {
        PiiEngine::new(fields.iter().map(|f| f.to_string()).collect())
    }

    #[test]
    fn test_mask_text() {
        assert_eq!(mask_text("", '*'), "");
        assert_eq!(mask_text("a", '*'), "*");
        assert_eq!(mask_text("ab", '*'), "**");
        assert_eq!(mask_text("abc", '*'), "a*c");
        assert_eq!(mask_text("secret", '#'), "s####t");
        assert_eq!(mask_text("żółwie", '*'), "ż****e");
    }

    #[test]
    fn test_anonymize_email_field() {
        let anonymized = engine(&["email"]).anonymize(&json!({"email": "ab@cd.com"}));
        assert_eq!(anonymized, json!({"email": "a*******m"}));
    }

    #[test]
    fn test_anonymize_email_in_free_text() {
        let anonymized = engine(&[]).anonymize(&json!({"contact": "ab@cd.com"}));
        assert_eq!(anonymized, json!({"contact": "a*******m"}));

        let anonymized =
            engine(&[]).anonymize(&json!({"note": "write to jane.doe@example.com today"}));
        assert_eq!(
            anonymized,
            json!({"note": "write to j******************m today"})
        );
    }

    #[test]
    fn test_anonymize_phone_ssn_and_card() {
        let pii = engine(&[]);
        assert_eq!(
            pii.mask_pii_in_string("call 555-123-4567 now"),
            "call 5**********7 now"
        );
        assert_eq!(pii.mask_pii_in_string("ssn 123-45-6789"), "ssn 1*********9");
        assert_eq!(
            pii.mask_pii_in_string("card 4111 1111 1111 1111 ok"),
            "card 4*****************1 ok"
        );
    }

    #[test]
    fn test_masked_length_matches_original() {
        let pii = engine(&[]);
        let text = "reach me at someone@example.org or 555.867.5309";
        let masked = pii.mask_pii_in_string(text);
        assert_eq!(masked.chars().count(), text.chars().count());
        assert!(!has_pii(&masked));
    }

    #[test]
    fn test_clean_text_passes_through() {
        let pii = engine(&[]);
        let text = "order 42 shipped to warehouse B";
        assert!(!has_pii(text));
        assert_eq!(pii.mask_pii_in_string(text), text);
    }

    #[test]
    fn test_sensitive_field_masked_regardless_of_type() {
        let pii = engine(&["password", "pin", "address", "deleted"]);
        let anonymized = pii.anonymize(&json!({
            "password": "hunter2",
            "pin": 1234,
            "address": {"street": "1 Main St"},
            "deleted": null,
            "name": "Bob"
        }));
        assert_eq!(anonymized["password"], json!("h*****2"));
        assert_eq!(anonymized["pin"], json!("1**4"));
        assert_eq!(
            anonymized["address"],
            json!(mask_text(r#"{"street":"1 Main St"}"#, '*'))
        );
        assert_eq!(anonymized["deleted"], Value::Null);
        assert_eq!(anonymized["name"], json!("Bob"));
    }

    #[test]
    fn test_sensitive_field_match_ignores_case() {
        let anonymized = engine(&["email"]).anonymize(&json!({"Email": "nobody"}));
        assert_eq!(anonymized, json!({"Email": "n****y"}));
    }

    #[test]
    fn test_nested_structures_and_key_order() {
        let pii = engine(&["ssn"]);
        let input = json!({
            "users": [
                {"id": 1, "ssn": "123-45-6789", "bio": "mail a@bc.io"},
                {"id": 2, "active": true}
            ],
            "total": 2
        });
        let anonymized = pii.anonymize(&input);
        assert_eq!(
            anonymized,
            json!({
                "users": [
                    {"id": 1, "ssn": "1*********9", "bio": "mail a*****o"},
                    {"id": 2, "active": true}
                ],
                "total": 2
            })
        );
        let root_keys: Vec<&str> = anonymized.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(root_keys, vec!["users", "total"]);
        let user_keys: Vec<&str> = anonymized["users"][0]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(user_keys, vec!["id", "ssn", "bio"]);
    }

    #[test]
    fn test_strings_inside_arrays_are_scanned() {
        let anonymized = engine(&[]).anonymize(&json!(["x@example.com", 5]));
        assert_eq!(anonymized, json!(["x***********m", 5]));
    }

    #[test]
    fn test_subtrees_past_max_depth_untouched() {
        let pii = engine(&["email"]).with_max_depth(2);
        let input = json!({
            "email": "top@level.com",
            "a": {"email": "mid@level.com", "b": {"email": "deep@level.com"}}
        });
        let anonymized = pii.anonymize(&input);
        assert_eq!(anonymized["email"], json!("t***********m"));
        assert_eq!(anonymized["a"]["email"], json!("m***********m"));
        assert_eq!(anonymized["a"]["b"], json!({"email": "deep@level.com"}));
    }

    #[test]
    fn test_disabled_engine_is_identity() {
        let input = json!({"email": "ab@cd.com"});
        let pii = engine(&["email"]).with_enabled(false);
        assert_eq!(pii.anonymize(&input), input);
    }

    #[test]
    fn test_detect_groups_by_category() {
        let pii = engine(&["email", "phone_number"]);
        let found = pii.detect(&json!({
            "user": {"email": "x@y.com", "phone_number": "555-123-4567"},
            "notes": "call 555-987-6543 or 123-45-6789"
        }));

        assert_eq!(found[&PiiCategory::Email], vec!["x@y.com", "x@y.com"]);
        assert_eq!(
            found[&PiiCategory::Phone],
            vec!["555-123-4567", "555-123-4567", "555-987-6543"]
        );
        assert_eq!(found[&PiiCategory::Ssn], vec!["123-45-6789"]);
        assert!(!found.contains_key(&PiiCategory::CreditCard));
    }

    #[test]
    fn test_detect_field_rule_requires_category_in_key() {
        let pii = engine(&["password", "user_email", "ssn"]);
        let input = json!({"password": "hunter2", "user_email": "nobody", "ssn": ""});

        let found = pii.detect(&input);
        assert_eq!(found.len(), 1);
        assert_eq!(found[&PiiCategory::Email], vec!["nobody"]);

        // anonymize still masks every sensitive field
        let anonymized = pii.anonymize(&input);
        assert_eq!(anonymized["password"], json!("h*****2"));
        assert_eq!(anonymized["user_email"], json!("n****y"));
    }

    #[test]
    fn test_findings_carry_field_key() {
        let findings = engine(&[]).findings(&json!({"contact": "a@bc.de", "list": ["d@ef.gh"]}));
        assert_eq!(
            findings,
            vec![
                PiiFinding {
                    category: PiiCategory::Email,
                    matched_text: "a@bc.de".to_string(),
                    field_key: Some("contact".to_string()),
                },
                PiiFinding {
                    category: PiiCategory::Email,
                    matched_text: "d@ef.gh".to_string(),
                    field_key: None,
                },
            ]
        );
    }

    #[test]
    fn test_detect_does_not_mutate() {
        let input = json!({"email": "ab@cd.com"});
        let before = input.clone();
        let _ = engine(&["email"]).detect(&input);
        assert_eq!(input, before);
    }

    #[test]
    fn test_detect_respects_max_depth() {
        let pii = engine(&[]).with_max_depth(1);
        let found = pii.detect(&json!({"a": "x@y.com", "b": {"c": "z@y.com"}}));
        assert_eq!(found[&PiiCategory::Email], vec!["x@y.com"]);
    }

    #[test]
    fn test_walk_stops_at_max_depth() {
        // As deep as serde_json will decode, well past the default limit.
        let mut value = json!("x@y.com");
        for _ in 0..100 {
            value = json!({ "n": value });
        }
        let pii = engine(&[]);

        let anonymized = pii.anonymize(&value);
        assert_eq!(anonymized, value);
        assert!(pii.detect(&value).is_empty());

        let shallow = json!({"n": {"n": "x@y.com"}});
        assert_eq!(pii.anonymize(&shallow), json!({"n": {"n": "x*****m"}}));
    }

    #[test]
    fn test_category_names() {
        let names: Vec<_> = PiiCategory::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["email", "phone", "ssn", "credit_card"]);
        assert_eq!(
            serde_json::to_value(PiiCategory::CreditCard).unwrap(),
            json!("credit_card")
        );
    }
}
