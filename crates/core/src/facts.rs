//! Canned facts served by the `get_random_fact` tool.
//!
//! The catalog is fixed at compile time. Selection goes through an
//! [`IndexSource`] so callers can swap the thread RNG for a deterministic
//! picker.

use rand::Rng;

/// Topic used when the model does not name one.
pub const DEFAULT_TOPIC: &str = "general";

/// Phrase every fact is wrapped in before it is handed back to the model.
pub const FACT_CARRIER: &str = "Oh dude, here's a wild one for you:";

const GENERAL: &[&str] = &[
    "Honey never spoils - archaeologists have found pots of honey in ancient Egyptian tombs that are over 3000 years old and still perfectly edible!",
    "Octopuses have three hearts and blue blood. Talk about being unique!",
    "A group of flamingos is called a 'flamboyance' - which is pretty perfect, right?",
];

const SPACE: &[&str] = &[
    "There are more stars in the universe than grains of sand on all Earth's beaches. Mind-blowing, dude!",
    "Venus spins backwards compared to most planets. It's like the rebel of the solar system!",
    "One day on Venus is longer than its year. Time works differently out there, man.",
];

const NATURE: &[&str] = &[
    "Trees can communicate with each other through underground fungal networks. It's like nature's internet!",
    "Dolphins have names for each other - they use signature whistles like we use names.",
    "A group of crows is called a 'murder', but a group of ravens is called an 'unkindness'. Dark but poetic!",
];

const MUSIC: &[&str] = &[
    "The Beatles' song 'A Day in the Life' has a frequency only dogs can hear at the end.",
    "Mozart wrote a song called 'Leck mich im Arsch' which... well, let's just say he had a sense of humor!",
    "The longest recorded song is 'The Rise and Fall of Bossanova' at 13 hours and 23 minutes.",
];

/// Picks an index into a non-empty list.
pub trait IndexSource: Send + Sync {
    /// Returns a value in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Uniform selection backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl IndexSource for ThreadRngSource {
    fn pick(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Always returns the same index, wrapped into range.
#[derive(Debug, Clone, Copy)]
pub struct FixedIndex(pub usize);

impl IndexSource for FixedIndex {
    fn pick(&self, len: usize) -> usize {
        self.0 % len
    }
}

/// Returns the facts for `topic`. Matching ignores case; unknown topics get the general list.
pub fn facts_for(topic: &str) -> &'static [&'static str] {
    match topic.to_lowercase().as_str() {
        "space" => SPACE,
        "nature" => NATURE,
        "music" => MUSIC,
        _ => GENERAL,
    }
}

/// Selects one fact about `topic` and wraps it in [`FACT_CARRIER`].
pub fn random_fact(topic: &str, source: &dyn IndexSource) -> String {
    let facts = facts_for(topic);
    let index = source.pick(facts.len()).min(facts.len() - 1);
    format!("{} {}", FACT_CARRIER, facts[index])
}
