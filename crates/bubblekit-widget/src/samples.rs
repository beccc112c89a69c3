//! Canned sample bubbles
//!
//! Produced when an `addBubble` arrives with no body: the periodic trigger,
//! the context-menu item, and the widget's own add button all use these.

use bubblekit_core::{Bubble, BubbleState, Priority};
use rand::seq::SliceRandom;

struct Sample {
    title: &'static str,
    content: &'static str,
    full_description: &'static str,
    priority: Priority,
}

const SAMPLES: &[Sample] = &[
    Sample {
        title: "New participant",
        content: "Someone joined the meeting",
        full_description: "A new participant just joined your meeting. \
                           Consider greeting them and sharing the current context.",
        priority: Priority::Medium,
    },
    Sample {
        title: "Screen sharing",
        content: "Screen sharing started",
        full_description: "Screen sharing is now active. \
                           Make sure the shared content is visible on your side.",
        priority: Priority::High,
    },
    Sample {
        title: "Chat activity",
        content: "New messages available",
        full_description: "New messages were posted in the meeting chat. \
                           Check the panel to stay up to date.",
        priority: Priority::Low,
    },
    Sample {
        title: "Network quality",
        content: "Connection stable",
        full_description: "Your network connection is stable. \
                           The meeting should run without interruptions.",
        priority: Priority::Low,
    },
];

/// Pick a random sample as a loading placeholder; the frame settles it in
/// place after the fixed fill-in delay.
pub fn sample_bubble() -> Bubble {
    let sample = SAMPLES
        .choose(&mut rand::thread_rng())
        .unwrap_or(&SAMPLES[0]);
    let mut bubble = Bubble::new(
        sample.title,
        sample.content,
        sample.full_description,
        sample.priority,
    );
    bubble.state = BubbleState::Loading;
    bubble
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_loading_placeholder() {
        let bubble = sample_bubble();
        assert_eq!(bubble.state, BubbleState::Loading);
        assert!(!bubble.title.is_empty());
        assert!(!bubble.full_description.is_empty());
    }
}
