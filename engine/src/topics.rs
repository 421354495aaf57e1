//! Topic Selector - picks conversation prompts for an identity without
//! immediate repetition, cycling once the list is exhausted.

use rand::seq::SliceRandom;

/// Returned when an identity carries no topic list at all.
pub const FALLBACK_TOPIC: &str = "What can Quack AI do?";

use crate::identity::Identity;

/// Pick a topic not yet used by this identity, uniformly at random, and
/// mark it used. Once every topic has been used the used-set resets and
/// repetition becomes possible again; short lists keep cycling rather
/// than running dry. An empty topic list yields the fallback without
/// mutating state.
pub fn next_topic(identity: &mut Identity) -> String {
    if identity.topics.is_empty() {
        return FALLBACK_TOPIC.to_string();
    }

    let mut rng = rand::thread_rng();
    let eligible: Vec<&String> = identity
        .topics
        .iter()
        .filter(|topic| !identity.used_topics.contains(*topic))
        .collect();

    let chosen = match eligible.choose(&mut rng) {
        Some(topic) => (*topic).clone(),
        None => {
            // Full cycle complete; start over.
            identity.used_topics.clear();
            identity
                .topics
                .choose(&mut rng)
                .cloned()
                .expect("topic list is non-empty")
        }
    };

    identity.used_topics.insert(chosen.clone());
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::create_identity;
    use std::collections::HashSet;

    fn identity_with_topics(topics: &[&str]) -> Identity {
        let mut identity = create_identity().unwrap();
        identity.topics = topics.iter().map(ToString::to_string).collect();
        identity
    }

    #[test]
    fn no_repeats_before_exhaustion() {
        let mut identity = identity_with_topics(&["a", "b", "c", "d"]);

        let mut seen = HashSet::new();
        for _ in 0..4 {
            let topic = next_topic(&mut identity);
            assert!(seen.insert(topic), "topic repeated before exhaustion");
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn used_set_resets_after_exhaustion() {
        let mut identity = identity_with_topics(&["a", "b"]);

        next_topic(&mut identity);
        next_topic(&mut identity);
        assert_eq!(identity.used_topics.len(), 2);

        // Third pick restarts the cycle: exactly one topic marked used.
        let third = next_topic(&mut identity);
        assert!(identity.topics.contains(&third));
        assert_eq!(identity.used_topics.len(), 1);
    }

    #[test]
    fn empty_list_yields_fallback_without_mutation() {
        let mut identity = identity_with_topics(&[]);

        assert_eq!(next_topic(&mut identity), FALLBACK_TOPIC);
        assert!(identity.used_topics.is_empty());
    }
}
