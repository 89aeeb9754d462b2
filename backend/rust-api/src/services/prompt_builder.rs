use crate::models::{ChallengeInfo, Message, Prompt};

pub const DEFAULT_RESPONSE_LANGUAGE: &str = "Korean";

/// Builds the tutoring and scoring prompts. Output depends only on the inputs.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    response_language: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_LANGUAGE)
    }
}

impl PromptBuilder {
    pub fn new(response_language: impl Into<String>) -> Self {
        Self {
            response_language: response_language.into(),
        }
    }

    pub fn tutoring_prompt(&self, challenge: &ChallengeInfo, transcript: &[Message]) -> Prompt {
        let text = format!(
            "You are a friendly AI tutor helping with algorithm problem solving.\n\
             \n\
             Current Problem: {title}\n\
             Problem Description: {description}\n\
             \n\
             When responding to user questions about this problem, follow these guidelines:\n\
             1. Don't provide easy answers. Give hints that allow the user to solve the problem independently.\n\
             2. Provide specific help for areas where the user is stuck.\n\
             3. Guide the user through a step-by-step approach.\n\
             4. Ask questions to check understanding during the process.\n\
             5. Offer encouragement and positive feedback.\n\
             6. Respond in {language} language.\n\
             \n\
             Previous conversation:\n\
             {conversation}",
            title = challenge.title,
            description = challenge.description,
            language = self.response_language,
            conversation = render_transcript(transcript),
        );
        Prompt::user(text)
    }

    pub fn scoring_prompt(&self, transcript: &[Message]) -> Prompt {
        let text = format!(
            "Analyze the following conversation and evaluate the user's understanding of the problem on a scale of 0-100.\n\
             \n\
             Evaluation Criteria:\n\
             - 80-100: Excellent understanding. The user demonstrates complete comprehension of the problem and clearly identifies the solution approach.\n\
             - 60-79: Good understanding. The user grasps most concepts but shows some gaps in understanding.\n\
             - 40-59: Basic understanding. The user understands fundamental concepts but struggles with solution direction.\n\
             - 20-39: Poor understanding. The user shows significant difficulty in comprehending the problem and needs substantial guidance.\n\
             - 0-19: Minimal understanding. The user shows almost no comprehension of the problem.\n\
             \n\
             Consider these factors in your evaluation:\n\
             1. Clarity of questions asked\n\
             2. Relevance of responses to the problem context\n\
             3. Demonstrated grasp of key concepts\n\
             4. Logical progression in problem-solving approach\n\
             \n\
             Conversation:\n\
             {conversation}\n\
             \n\
             Respond with only a number between 0 and 100.",
            conversation = render_transcript(transcript),
        );
        Prompt::user(text)
    }
}

/// One `<sender>: <content>` line per message, in insertion order.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.sender, message.content))
        .collect::<Vec<_>>()
        .join("\n")
}
