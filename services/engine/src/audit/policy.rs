//! IAM Policy Documents
//!
//! Typed schema for the JSON documents returned by `GetPolicyVersion`.
//! `Statement`, `Action` and `Resource` may each be a single value or a list,
//! so they are modelled as [`OneOrMany`] and matched exhaustively.

use serde::{Deserialize, Serialize};
use std::string::FromUtf8Error;
use thiserror::Error;

/// Literal wildcard granting every action or every resource
pub const WILDCARD: &str = "*";

/// How strictly `Action`/`Resource` wildcards are recognised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardMatching {
    /// Only the bare string `"*"` counts as a wildcard
    #[default]
    BareString,
    /// A list containing `"*"` also counts
    IncludeLists,
}

/// A JSON field that may hold one value or a list of values
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default)]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Action", default)]
    pub action: Option<OneOrMany<String>>,
    #[serde(rename = "Resource", default)]
    pub resource: Option<OneOrMany<String>>,
}

impl Statement {
    /// Whether the statement allows every action on every resource
    pub fn grants_admin(&self, matching: WildcardMatching) -> bool {
        self.effect == Effect::Allow
            && is_wildcard(self.action.as_ref(), matching)
            && is_wildcard(self.resource.as_ref(), matching)
    }
}

fn is_wildcard(field: Option<&OneOrMany<String>>, matching: WildcardMatching) -> bool {
    match (field, matching) {
        (Some(OneOrMany::One(value)), _) => value == WILDCARD,
        (Some(OneOrMany::Many(values)), WildcardMatching::IncludeLists) => {
            values.iter().any(|v| v == WILDCARD)
        }
        (Some(OneOrMany::Many(_)), WildcardMatching::BareString) | (None, _) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "Statement")]
    pub statements: OneOrMany<Statement>,
}

impl PolicyDocument {
    /// Decode a URL-encoded policy document of `policy_arn`
    pub fn from_encoded(policy_arn: &str, encoded: &str) -> Result<Self, PolicyParseError> {
        let decoded = urlencoding::decode(encoded).map_err(|source| PolicyParseError::Decode {
            policy: policy_arn.to_string(),
            source,
        })?;

        serde_json::from_str(&decoded).map_err(|source| PolicyParseError::Malformed {
            policy: policy_arn.to_string(),
            source,
        })
    }

    /// First statement granting admin access. Later statements are never
    /// inspected once one matches.
    pub fn admin_statement(&self, matching: WildcardMatching) -> Option<&Statement> {
        self.statements
            .as_slice()
            .iter()
            .find(|statement| statement.grants_admin(matching))
    }
}

/// A policy document could not be turned into a [`PolicyDocument`]
#[derive(Debug, Error)]
pub enum PolicyParseError {
    #[error("Policy {policy} is not valid URL-encoded UTF-8: {source}")]
    Decode {
        policy: String,
        #[source]
        source: FromUtf8Error,
    },

    #[error("Policy {policy} has a malformed document: {source}")]
    Malformed {
        policy: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:iam::123456789012:policy/test";

    fn encode(json: &str) -> String {
        urlencoding::encode(json).into_owned()
    }

    #[test]
    fn test_admin_statement_among_benign_ones() {
        let doc = PolicyDocument::from_encoded(
            ARN,
            &encode(
                r#"{"Version":"2012-10-17","Statement":[
                    {"Effect":"Allow","Action":"s3:GetObject","Resource":"*"},
                    {"Sid":"Admin","Effect":"Allow","Action":"*","Resource":"*"}
                ]}"#,
            ),
        )
        .unwrap();

        let statement = doc.admin_statement(WildcardMatching::BareString).unwrap();
        assert_eq!(statement.sid.as_deref(), Some("Admin"));
    }

    #[test]
    fn test_deny_wildcard_is_not_admin() {
        let doc = PolicyDocument::from_encoded(
            ARN,
            &encode(r#"{"Statement":[{"Effect":"Deny","Action":"*","Resource":"*"}]}"#),
        )
        .unwrap();

        assert!(doc.admin_statement(WildcardMatching::BareString).is_none());
    }

    #[test]
    fn test_list_wildcards_need_include_lists() {
        let doc = PolicyDocument::from_encoded(
            ARN,
            &encode(r#"{"Statement":[{"Effect":"Allow","Action":["*"],"Resource":["*"]}]}"#),
        )
        .unwrap();

        assert!(doc.admin_statement(WildcardMatching::BareString).is_none());
        assert!(doc.admin_statement(WildcardMatching::IncludeLists).is_some());
    }

    #[test]
    fn test_single_statement_object() {
        let doc = PolicyDocument::from_encoded(
            ARN,
            &encode(r#"{"Statement":{"Effect":"Allow","Action":"*","Resource":"*"}}"#),
        )
        .unwrap();

        assert_eq!(doc.statements.as_slice().len(), 1);
        assert!(doc.admin_statement(WildcardMatching::BareString).is_some());
    }

    #[test]
    fn test_not_action_statement_is_not_admin() {
        let doc = PolicyDocument::from_encoded(
            ARN,
            &encode(r#"{"Statement":[{"Effect":"Allow","NotAction":"iam:*","Resource":"*"}]}"#),
        )
        .unwrap();

        assert!(doc.admin_statement(WildcardMatching::IncludeLists).is_none());
    }

    #[test]
    fn test_missing_statement_is_an_error() {
        let err = PolicyDocument::from_encoded(ARN, &encode(r#"{"Version":"2012-10-17"}"#))
            .unwrap_err();
        assert!(matches!(err, PolicyParseError::Malformed { .. }));
        assert!(err.to_string().contains(ARN));
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let err = PolicyDocument::from_encoded(ARN, "%FF%FE").unwrap_err();
        assert!(matches!(err, PolicyParseError::Decode { .. }));
    }
}
