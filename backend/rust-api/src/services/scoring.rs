use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{GENERATION_DURATION_SECONDS, GENERATION_REQUESTS_TOTAL, UNDERSTANDING_SCORE};
use crate::models::Message;

use super::ports::{GenerationError, TextGenerator};
use super::prompt_builder::PromptBuilder;

pub const DEFAULT_SCORE: u8 = 70;
pub const MAX_SCORE: u8 = 100;

/// Turns a finished transcript into a 0-100 understanding score.
///
/// Never fails: generation faults and unreadable replies yield [`DEFAULT_SCORE`].
pub struct ScoringStrategy {
    generator: Arc<dyn TextGenerator>,
    prompts: PromptBuilder,
    timeout: Duration,
}

impl ScoringStrategy {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: PromptBuilder, timeout: Duration) -> Self {
        Self {
            generator,
            prompts,
            timeout,
        }
    }

    pub async fn score(&self, transcript: &[Message]) -> u8 {
        let prompt = self.prompts.scoring_prompt(transcript);
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.generator.generate(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        };

        GENERATION_DURATION_SECONDS
            .with_label_values(&["scoring"])
            .observe(start.elapsed().as_secs_f64());

        let score = match result {
            Ok(reply) => {
                GENERATION_REQUESTS_TOTAL
                    .with_label_values(&["scoring", "success"])
                    .inc();
                parse_score(&reply).unwrap_or_else(|| {
                    tracing::warn!(
                        "Scoring reply had no usable number, using default {}: {:?}",
                        DEFAULT_SCORE,
                        truncate(&reply, 80)
                    );
                    DEFAULT_SCORE
                })
            }
            Err(e) => {
                GENERATION_REQUESTS_TOTAL
                    .with_label_values(&["scoring", "failure"])
                    .inc();
                tracing::error!("Scoring generation failed, using default {}: {}", DEFAULT_SCORE, e);
                DEFAULT_SCORE
            }
        };

        UNDERSTANDING_SCORE.observe(f64::from(score));
        score
    }
}

/// Reads the first contiguous run of ASCII digits and clamps it to 0..=100.
///
/// "I'd rate this 83 out of 100." scores 83, not the clamped `83100`.
/// Returns `None` when the reply has no digits or the run overflows `u32`.
pub fn parse_score(reply: &str) -> Option<u8> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        return None;
    }

    let value = digits.parse::<u32>().ok()?;
    Some(value.min(u32::from(MAX_SCORE)) as u8)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Prompt;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FixedReply(Result<String, ()>);

    #[async_trait]
    impl TextGenerator for FixedReply {
        async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            self.0
                .clone()
                .map_err(|_| GenerationError::Transport("connection refused".to_string()))
        }
    }

    struct CapturePrompt(Mutex<Vec<Prompt>>);

    #[async_trait]
    impl TextGenerator for CapturePrompt {
        async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
            self.0.lock().unwrap().push(prompt.clone());
            Ok("64".to_string())
        }
    }

    struct Stalls;

    #[async_trait]
    impl TextGenerator for Stalls {
        async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("99".to_string())
        }
    }

    fn strategy(generator: Arc<dyn TextGenerator>) -> ScoringStrategy {
        ScoringStrategy::new(generator, PromptBuilder::default(), Duration::from_secs(5))
    }

    fn transcript() -> Vec<Message> {
        let now = Utc::now();
        vec![
            Message::user("Should I sort first?", now),
            Message::assistant("What would sorting cost you here?", now),
        ]
    }

    #[test]
    fn parse_score_takes_first_digit_run() {
        let reply = "I'd rate this 83 out of 100.";
        assert_eq!(parse_score(reply), Some(83));

        // Concatenating every digit would read 83100 and clamp to 100.
        let concatenated: String = reply.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(concatenated, "83100");
        assert_ne!(parse_score(reply), Some(MAX_SCORE));
    }

    #[test]
    fn parse_score_handles_plain_and_noisy_replies() {
        assert_eq!(parse_score("75"), Some(75));
        assert_eq!(parse_score("  42\n"), Some(42));
        assert_eq!(parse_score("Score: 007"), Some(7));
        assert_eq!(parse_score("-5"), Some(5));
        assert_eq!(parse_score("page 2 of 100"), Some(2));
    }

    #[test]
    fn parse_score_clamps_to_hundred() {
        assert_eq!(parse_score("150"), Some(100));
        assert_eq!(parse_score("100"), Some(100));
        assert_eq!(parse_score("0"), Some(0));
    }

    #[test]
    fn parse_score_rejects_missing_or_overflowing_numbers() {
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("excellent understanding"), None);
        assert_eq!(parse_score("99999999999999999999"), None);
    }

    #[tokio::test]
    async fn score_uses_parsed_reply() {
        let scorer = strategy(Arc::new(FixedReply(Ok("I'd rate this 83 out of 100.".into()))));
        assert_eq!(scorer.score(&transcript()).await, 83);
    }

    #[tokio::test]
    async fn score_defaults_when_generation_fails() {
        let scorer = strategy(Arc::new(FixedReply(Err(()))));
        assert_eq!(scorer.score(&transcript()).await, DEFAULT_SCORE);
    }

    #[tokio::test]
    async fn score_defaults_when_reply_has_no_number() {
        let scorer = strategy(Arc::new(FixedReply(Ok("quite good".into()))));
        assert_eq!(scorer.score(&transcript()).await, 70);
    }

    #[tokio::test(start_paused = true)]
    async fn score_defaults_when_generation_times_out() {
        let scorer = ScoringStrategy::new(
            Arc::new(Stalls),
            PromptBuilder::default(),
            Duration::from_secs(30),
        );
        assert_eq!(scorer.score(&transcript()).await, DEFAULT_SCORE);
    }

    #[tokio::test]
    async fn score_sends_full_transcript() {
        let capture = Arc::new(CapturePrompt(Mutex::new(Vec::new())));
        let scorer = strategy(capture.clone());

        assert_eq!(scorer.score(&transcript()).await, 64);

        let prompts = capture.0.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].blocks[0].content.contains(
            "user: Should I sort first?\nassistant: What would sorting cost you here?"
        ));
    }
}
