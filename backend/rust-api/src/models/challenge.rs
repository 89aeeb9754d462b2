use serde::{Deserialize, Serialize};

/// Challenge metadata the tutor needs to frame a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInfo {
    pub id: String,
    pub title: String,
    pub description: String,
}
