pub mod challenge;
pub mod chat;
pub mod chat_api;
pub mod prompt;

pub use challenge::ChallengeInfo;
pub use chat::{
    ChatSession, Message, Sender, SessionKey, SessionSnapshot, DEFAULT_MAX_INTERACTIONS,
};
pub use chat_api::{ChallengeChatRequest, ChatSessionQuery};
pub use prompt::{Prompt, PromptBlock, PromptRole};
