//! Session State Machine - the per-actor input flow that collects
//! count, referral code, and topics, then hands a job request to the
//! engine. Invalid input re-prompts in place; the flow owns no I/O.

use once_cell::sync::Lazy;
use regex::Regex;

/// Referral codes are exactly six letters.
static REFERRAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z]{6}$").expect("referral code pattern compiles"));

pub fn referral_code_is_valid(code: &str) -> bool {
    REFERRAL_CODE.is_match(code)
}

/// Where an actor's session currently sits. A session record only exists
/// between `/start` and job hand-off; there is no explicit idle variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    AwaitingCount,
    AwaitingReferral { count: u32 },
    AwaitingTopics { count: u32, referral_code: String },
}

/// Collected inputs, ready for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    pub count: u32,
    pub referral_code: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Stay in the flow (same or next stage) and send `reply`.
    Continue { stage: Stage, reply: String },
    /// Terminal: discard the session and start a job.
    Submit { input: JobInput },
}

pub fn count_prompt(ceiling: u32) -> String {
    format!("How many identities should I provision? (1-{ceiling})")
}

/// Advance the flow by one inbound message.
pub fn step(stage: Stage, text: &str, ceiling: u32) -> Step {
    let text = text.trim();
    match stage {
        Stage::AwaitingCount => match text.parse::<u32>() {
            Ok(count) if (1..=ceiling).contains(&count) => Step::Continue {
                stage: Stage::AwaitingReferral { count },
                reply: format!(
                    "Got it - {count} identities. Now send the 6-letter referral code."
                ),
            },
            _ => Step::Continue {
                stage: Stage::AwaitingCount,
                reply: format!("Please send a whole number between 1 and {ceiling}."),
            },
        },
        Stage::AwaitingReferral { count } => {
            if referral_code_is_valid(text) {
                Step::Continue {
                    stage: Stage::AwaitingTopics {
                        count,
                        referral_code: text.to_string(),
                    },
                    reply: "Last step: send a comma-separated list of conversation topics."
                        .to_string(),
                }
            } else {
                Step::Continue {
                    stage: Stage::AwaitingReferral { count },
                    reply: "Referral codes are exactly 6 letters. Try again.".to_string(),
                }
            }
        }
        Stage::AwaitingTopics {
            count,
            referral_code,
        } => {
            let topics: Vec<String> = text
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .collect();
            if topics.is_empty() {
                Step::Continue {
                    stage: Stage::AwaitingTopics {
                        count,
                        referral_code,
                    },
                    reply: "I need at least one topic. Send a comma-separated list.".to_string(),
                }
            } else {
                Step::Submit {
                    input: JobInput {
                        count,
                        referral_code,
                        topics,
                    },
                }
            }
        }
    }
}
