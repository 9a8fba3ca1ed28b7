// Site Entities (narrow - only what the runners read and write)

use serde::{Deserialize, Serialize};

/// Website under audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Website {
    pub website_id: String,
    pub project_id: String,
    pub name: String,
    pub base_url: String,
    pub login_url: Option<String>,
}

/// A known page of a website
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub website_id: String,
    pub url: String,
    pub title: Option<String>,
    /// Identity labels that have seen this page ("guest" or a username)
    pub visible_to: Vec<String>,
    pub last_tested_at: Option<i64>,
    pub last_test_passed: Option<bool>,
}

/// Named website user a run may authenticate as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectUser {
    pub user_id: String,
    pub username: String,
}

/// Authentication persona for a crawl/test pass
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Anonymous, unauthenticated pass
    Guest,
    /// Named website user
    User(String),
}

impl Identity {
    /// Map the wire convention (empty string = guest) onto the enum
    pub fn from_name(name: &str) -> Self {
        if name.is_empty() {
            Identity::Guest
        } else {
            Identity::User(name.to_string())
        }
    }

    /// Label used in merged page records and progress messages
    pub fn label(&self) -> &str {
        match self {
            Identity::Guest => "guest",
            Identity::User(name) => name,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One page as reported by the crawl engine for one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPage {
    /// Canonical URL - the merge key across identities
    pub url: String,
    pub title: Option<String>,
    /// Identities that have seen this page, first discoverer first
    pub visible_to: Vec<String>,
    /// Set when the page errored during discovery
    pub error: Option<String>,
}

/// Outcome of one page test from the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTestResult {
    pub url: String,
    pub passed: bool,
    pub issue_count: u32,
    /// Engine-specific findings payload, passed through opaquely
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_name_maps_empty_to_guest() {
        assert_eq!(Identity::from_name(""), Identity::Guest);
        assert_eq!(
            Identity::from_name("user42"),
            Identity::User("user42".into())
        );
    }

    #[test]
    fn identity_labels() {
        assert_eq!(Identity::Guest.label(), "guest");
        assert_eq!(Identity::User("alice".into()).label(), "alice");
        assert!(Identity::Guest.is_guest());
    }
}
