//! Topic discovery for auto-initiated pipelines.
//!
//! The orchestrator only needs a source of topics; where they come from
//! (trend feeds, an editorial backlog, a wire service) is up to the embedder.

use crate::error::PressroomResult;
use crate::models::Urgency;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTopic {
    pub topic: String,
    pub urgency: Urgency,
}

impl DiscoveredTopic {
    pub fn new(topic: impl Into<String>, urgency: Urgency) -> Self {
        Self {
            topic: topic.into(),
            urgency,
        }
    }
}

#[async_trait]
pub trait TopicDiscovery: Send + Sync {
    /// Up to `max_topics` new topics, restricted to `urgency_filter` when given
    async fn discover(
        &self,
        max_topics: usize,
        urgency_filter: Option<Urgency>,
    ) -> PressroomResult<Vec<DiscoveredTopic>>;
}

/// Fixed backlog of topics. Each topic is handed out once.
#[derive(Debug, Default)]
pub struct StaticTopicSource {
    topics: Mutex<VecDeque<DiscoveredTopic>>,
}

impl StaticTopicSource {
    pub fn new(topics: impl IntoIterator<Item = DiscoveredTopic>) -> Self {
        Self {
            topics: Mutex::new(topics.into_iter().collect()),
        }
    }

    pub fn push(&self, topic: DiscoveredTopic) {
        self.topics.lock().push_back(topic);
    }

    pub fn remaining(&self) -> usize {
        self.topics.lock().len()
    }
}

#[async_trait]
impl TopicDiscovery for StaticTopicSource {
    async fn discover(
        &self,
        max_topics: usize,
        urgency_filter: Option<Urgency>,
    ) -> PressroomResult<Vec<DiscoveredTopic>> {
        let mut topics = self.topics.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(topics.len());

        while let Some(topic) = topics.pop_front() {
            let wanted = urgency_filter.map_or(true, |urgency| topic.urgency == urgency);
            if wanted && taken.len() < max_topics {
                taken.push(topic);
            } else {
                kept.push_back(topic);
            }
        }
        *topics = kept;
        Ok(taken)
    }
}
