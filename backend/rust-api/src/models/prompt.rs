use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBlock {
    pub role: PromptRole,
    pub content: String,
}

/// Ordered blocks sent to the text generation backend in a single call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Prompt {
    pub blocks: Vec<PromptBlock>,
}

impl Prompt {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            blocks: vec![PromptBlock {
                role: PromptRole::User,
                content: content.into(),
            }],
        }
    }

    /// Total characters across blocks, used for logging only.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|block| block.content.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|block| block.content.is_empty())
    }
}
