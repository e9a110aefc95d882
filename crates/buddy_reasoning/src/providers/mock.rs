//! Offline providers: a heuristic engine for running without API keys, and a
//! scripted client for tests.

use crate::api_types::{Message, MessagesResponse};
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts::{CLASSIFIER_ROLE, SUMMARY_ROLE};
use anyhow::Result;
use buddy_core::EmotionLabel;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

const PAIN_WORDS: &[&str] = &[
    "pain", "hurt", "ache", "aching", "sore", "dizzy", "sick", "unwell", "tired",
];
const FALL_WORDS: &[&str] = &["fell", "fallen", "a fall", "tripped"];
const LONELY_WORDS: &[&str] = &["lonely", "all alone", "so alone", "nobody visits", "miss my", "miss him", "miss her"];
const ANXIOUS_WORDS: &[&str] = &["worried", "worry", "anxious", "nervous", "scared", "afraid", "stress"];
const CONFUSION_WORDS: &[&str] = &["confused", "can't remember", "cannot remember", "forgot where"];
const DARK_WORDS: &[&str] = &["want to die", "end it", "hurt myself", "no point living"];
const HAPPY_WORDS: &[&str] = &["happy", "great", "wonderful", "lovely", "glad", "fun", "love", "enjoyed"];

const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "without", "hardly"];
/// Words before a trigger that a negation may sit in to cancel it.
const NEGATION_REACH: usize = 3;
const RESOLVED: &[&str] = &["fine now", "better now", "okay now", "ok now", "all better", "gone now"];

/// Engine stand-in that answers each prompt kind with a keyword heuristic.
#[derive(Debug, Clone)]
pub struct MockProvider {
    model: String,
}

impl MockProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        _params: CompletionParams,
    ) -> Result<MessagesResponse> {
        let input = messages.last().map(|m| m.text()).unwrap_or_default();

        let text = if system.starts_with(CLASSIFIER_ROLE) {
            heuristic_label(&input).as_str().to_string()
        } else if system.starts_with(SUMMARY_ROLE) {
            heuristic_summary(&input)
        } else {
            match heuristic_label(&input) {
                EmotionLabel::PainSuspected => "Oh no, I'm sorry you're not feeling well. Maybe let your caregiver know? Woof, I'm right here with you.".to_string(),
                EmotionLabel::Sad => "I'm here with you, friend. Would you like to tell me more about it?".to_string(),
                EmotionLabel::Anxious => "That sounds worrying. Let's take a slow breath together. What's on your mind?".to_string(),
                EmotionLabel::Happy => "Woof! That makes my tail wag! Tell me more!".to_string(),
                EmotionLabel::Neutral => format!("(Mock {} Response) Thanks for telling me! How is the rest of your day going?", self.model),
            }
        };

        Ok(MessagesResponse::from_text(text))
    }
}

/// Clauses of sentences that still describe a present problem; resolved
/// sentences are dropped.
fn live_clauses(text: &str) -> Vec<String> {
    let lower = text
        .to_lowercase()
        .replace("not feeling well", "unwell")
        .replace("not feeling good", "unwell");
    lower
        .split(['.', '!', '?', '\n'])
        .filter(|sentence| !RESOLVED.iter().any(|r| sentence.contains(r)))
        .flat_map(|sentence| {
            sentence
                .split([',', ';'])
                .flat_map(|c| c.split(" but "))
                .map(|c| c.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|clause| !clause.is_empty())
        .collect()
}

fn is_negation(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
    word.ends_with("n't") || NEGATIONS.contains(&word)
}

/// True when some occurrence of `trigger` in `clause` has no negation in
/// the few words right before it.
fn asserted(clause: &str, trigger: &str) -> bool {
    clause.match_indices(trigger).any(|(at, _)| {
        !clause[..at]
            .split_whitespace()
            .rev()
            .take(NEGATION_REACH)
            .any(is_negation)
    })
}

fn any_word(clauses: &[String], words: &[&str]) -> Option<String> {
    clauses
        .iter()
        .find(|c| words.iter().any(|w| asserted(c, w)))
        .cloned()
}

fn heuristic_label(text: &str) -> EmotionLabel {
    let clauses = live_clauses(text);
    if any_word(&clauses, PAIN_WORDS).is_some() || any_word(&clauses, FALL_WORDS).is_some() {
        EmotionLabel::PainSuspected
    } else if any_word(&clauses, ANXIOUS_WORDS).is_some() {
        EmotionLabel::Anxious
    } else if any_word(&clauses, LONELY_WORDS).is_some() || any_word(&clauses, DARK_WORDS).is_some() {
        EmotionLabel::Sad
    } else if any_word(&clauses, HAPPY_WORDS).is_some() {
        EmotionLabel::Happy
    } else {
        EmotionLabel::Neutral
    }
}

fn heuristic_summary(transcript: &str) -> String {
    let subject_lines: Vec<&str> = transcript
        .lines()
        .filter_map(|l| l.strip_prefix("[subject]: "))
        .collect();

    let mut concern = None;
    for line in &subject_lines {
        let clauses = live_clauses(line);
        let hit = [
            (DARK_WORDS, "Expressed thoughts of self-harm"),
            (FALL_WORDS, "Mentioned a fall"),
            (PAIN_WORDS, "Reported physical discomfort"),
            (CONFUSION_WORDS, "Showed signs of confusion"),
            (LONELY_WORDS, "Expressed loneliness"),
        ]
        .into_iter()
        .find_map(|(words, what)| any_word(&clauses, words).map(|c| format!("{}: \"{}\"", what, c)));
        if hit.is_some() {
            concern = hit;
            break;
        }
    }

    let happy = subject_lines
        .iter()
        .filter(|l| heuristic_label(l) == EmotionLabel::Happy)
        .count();
    let mood = if concern.is_some() {
        "somewhat troubled"
    } else if happy * 2 >= subject_lines.len() && happy > 0 {
        "cheerful"
    } else {
        "calm"
    };

    serde_json::json!({
        "summary": format!(
            "Shared {} messages with the companion today. Overall mood seemed {}.",
            subject_lines.len(),
            mood
        ),
        "hasConcern": concern.is_some(),
        "concernReason": concern,
    })
    .to_string()
}

/// One queued answer for [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: std::result::Result<String, String>,
    delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(text.into()),
            delay: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            delay: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request as the scripted client saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub user_text: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_attempts: u32,
}

/// Test client that replays queued answers and records every request.
///
/// Answers can be routed by system prompt prefix, which keeps concurrent
/// classifier and reply calls deterministic.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    routes: Mutex<Vec<(String, VecDeque<ScriptedReply>)>>,
    fallback: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for any prompt.
    pub fn push(&self, reply: ScriptedReply) -> &Self {
        lock(&self.fallback).push_back(reply);
        self
    }

    /// Queue an answer for prompts whose system text starts with `prefix`.
    pub fn push_for(&self, prefix: &str, reply: ScriptedReply) -> &Self {
        let mut routes = lock(&self.routes);
        match routes.iter().position(|(p, _)| p == prefix) {
            Some(i) => routes[i].1.push_back(reply),
            None => routes.push((prefix.to_string(), VecDeque::from([reply]))),
        }
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_reply(&self, system: &str) -> Option<ScriptedReply> {
        let routed = lock(&self.routes)
            .iter_mut()
            .find(|(prefix, queue)| system.starts_with(prefix.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        routed.or_else(|| lock(&self.fallback).pop_front())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl LlmClient for ScriptedProvider {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse> {
        lock(&self.requests).push(RecordedRequest {
            system: system.to_string(),
            user_text: messages.last().map(|m| m.text()).unwrap_or_default(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            max_attempts: params.max_attempts,
        });

        let Some(reply) = self.next_reply(system) else {
            anyhow::bail!("scripted provider has no reply queued");
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        match reply.outcome {
            Ok(text) => Ok(MessagesResponse::from_text(text)),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}
