//! Subscription request sent after every successful dial.
//!
//! Binance combined-stream endpoints take a JSON request of the form
//! `{"method":"SUBSCRIBE","params":["!ticker@arr"],"id":1}` and answer with
//! `{"result":null,"id":1}`.

use crate::error::TbError;

/// The all-market rolling-window ticker stream.
pub const DEFAULT_TOPIC: &str = "!ticker@arr";

/// Request id used when none is configured.
pub const DEFAULT_REQUEST_ID: u64 = 1;

/// Immutable description of what to subscribe to.
///
/// Construct through [`SubscriptionSpec::new`], which validates the topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    topics: Vec<String>,
    request_id: u64,
}

impl SubscriptionSpec {
    /// Build a spec from a topic list.
    ///
    /// Fails if the list is empty or any topic is blank or contains whitespace.
    /// Duplicate topics are collapsed, keeping first-seen order.
    pub fn new<I, S>(topics: I, request_id: u64) -> Result<Self, TbError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for topic in topics {
            let topic = topic.into();
            if topic.is_empty() || topic.chars().any(char::is_whitespace) {
                return Err(TbError::InvalidSubscription(format!("bad topic {topic:?}")));
            }
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        if unique.is_empty() {
            return Err(TbError::InvalidSubscription("no topics".into()));
        }
        Ok(Self { topics: unique, request_id })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// The text frame sent to the upstream to subscribe.
    pub fn wire_request(&self) -> String {
        serde_json::json!({
            "method": "SUBSCRIBE",
            "params": self.topics,
            "id": self.request_id
        })
        .to_string()
    }
}

impl Default for SubscriptionSpec {
    fn default() -> Self {
        Self { topics: vec![DEFAULT_TOPIC.to_string()], request_id: DEFAULT_REQUEST_ID }
    }
}
