//! Subject-scoped topic names

/// Maps logical topic names into the `users/<subject>/` namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamespace {
    subject: String,
}

impl TopicNamespace {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn scope(&self, topic: &str) -> String {
        format!("users/{}/{}", self.subject, topic)
    }
}
