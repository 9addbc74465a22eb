// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resource names for topics and subscriptions.

use std::fmt;

/// A topic, scoped to a project. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicRef {
    project: String,
    name: String,
}

impl TopicRef {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }

    /// Fully-qualified path, `projects/{project}/topics/{name}`.
    pub fn path(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.name)
    }
}

impl fmt::Display for TopicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A durable subscription, scoped to a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionRef {
    project: String,
    name: String,
}

impl SubscriptionRef {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }

    /// Fully-qualified path, `projects/{project}/subscriptions/{name}`.
    pub fn path(&self) -> String {
        format!("projects/{}/subscriptions/{}", self.project, self.name)
    }
}

impl fmt::Display for SubscriptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Compares two fully-qualified resource paths ignoring case.
pub fn paths_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Checks a topic or subscription name against the Pub/Sub naming rules.
///
/// A valid name:
/// - is between 3 and 255 characters long
/// - starts with an ASCII letter
/// - contains only ASCII alphanumerics and `-_.~+%`
/// - does not start with `goog`
///
/// # Examples
///
/// ```
/// use pubsub_relay::names::validate_resource_name;
///
/// assert!(validate_resource_name("splunk").is_ok());
/// assert!(validate_resource_name("audit-logs.v2").is_ok());
/// assert!(validate_resource_name("1splunk").is_err());
/// assert!(validate_resource_name("google-logs").is_err());
/// ```
pub fn validate_resource_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(3..=255).contains(&len) {
        return Err(format!(
            "'{name}' must be between 3 and 255 characters long, got {len}"
        ));
    }

    match name.chars().next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return Err(format!("'{name}' must start with a letter")),
    }

    if let Some(invalid) = name
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && !"-_.~+%".contains(*ch))
    {
        return Err(format!("'{name}' contains invalid character '{invalid}'"));
    }

    if name.to_ascii_lowercase().starts_with("goog") {
        return Err(format!("'{name}' must not start with 'goog'"));
    }

    Ok(())
}
