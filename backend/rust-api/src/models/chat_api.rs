use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ChallengeChatRequest {
    #[validate(length(min = 1, max = 128, message = "user_id must not be empty"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 4000, message = "message must be 1-4000 characters"))]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatSessionQuery {
    #[validate(length(min = 1, max = 128, message = "user_id must not be empty"))]
    pub user_id: String,
}
