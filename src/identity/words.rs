//! Vocabulary for generated agent names

/// Adjectives (tech and nature themed)
pub const ADJECTIVES: &[&str] = &[
    "quantum", "cyber", "neural", "swift", "silent", "crimson", "silver", "golden",
    "azure", "emerald", "jade", "obsidian", "crystal", "stellar", "lunar", "solar",
    "cosmic", "atomic", "electric", "magnetic", "sonic", "photon", "plasma", "fusion",
    "blazing", "frozen", "storm", "thunder", "lightning", "shadow", "ghost", "phantom",
    "stealth", "rapid", "turbo", "hyper", "ultra", "mega", "giga", "tera", "alpha", "beta",
    "gamma", "delta", "omega", "prime", "apex", "zenith", "nexus", "vertex", "vortex",
    "matrix", "vector", "tensor", "scalar", "quasar", "nebula", "pulsar", "comet",
    "meteor", "asteroid", "eclipse", "aurora", "corona", "mystic", "arcane", "ethereal",
    "astral", "celestial", "divine", "sacred", "ancient", "eternal", "infinite",
    "limitless", "boundless", "endless", "timeless", "ageless", "deathless", "fierce",
    "savage", "wild", "feral", "primal", "brutal", "ruthless", "merciless", "gentle",
    "calm", "serene", "peaceful", "tranquil", "quiet", "still", "bright", "radiant",
    "brilliant", "luminous", "glowing", "shining", "gleaming", "sparkling", "dark",
    "shadowy", "murky", "dim", "dusky", "gloomy", "somber", "bleak", "bold", "brave",
    "valiant", "heroic", "noble", "proud", "majestic", "wise", "sage", "clever", "cunning",
    "crafty", "shrewd", "astute", "keen", "agile", "nimble", "quick", "fleet", "hasty",
    "speedy", "strong", "mighty", "powerful", "robust", "sturdy", "tough", "hardy",
    "resilient", "sleek", "smooth", "polished", "refined", "elegant", "graceful",
    "flowing", "fluid", "sharp", "acute", "piercing", "cutting", "incisive", "pointed",
    "edged", "amber", "ruby", "sapphire", "topaz", "garnet", "pearl", "opal", "onyx",
    "cobalt", "indigo", "violet", "magenta", "cyan", "teal", "olive", "scarlet",
    "vermillion", "burgundy", "maroon", "rust", "copper", "bronze", "iron", "steel",
    "titanium", "platinum", "chrome", "nickel", "zinc", "mercury", "arctic", "alpine",
    "polar", "glacial", "tundra", "boreal", "tropical", "desert",
];

/// Nouns (animals, tech concepts, elements)
pub const NOUNS: &[&str] = &[
    "falcon", "hawk", "eagle", "raven", "crow", "owl", "phoenix", "dragon", "wolf", "fox",
    "lynx", "panther", "leopard", "jaguar", "cheetah", "cougar", "tiger", "lion", "bear",
    "shark", "orca", "dolphin", "whale", "octopus", "spider", "mantis", "scorpion",
    "viper", "cobra", "python", "anaconda", "mamba", "cipher", "code", "algorithm",
    "protocol", "system", "network", "circuit", "processor", "kernel", "daemon", "thread",
    "process", "socket", "buffer", "cache", "registry", "compiler", "parser", "lexer",
    "interpreter", "debugger", "profiler", "tracer", "monitor", "firewall", "gateway",
    "router", "switch", "hub", "node", "server", "client", "agent", "proxy", "broker",
    "handler", "manager", "controller", "director", "sentinel", "guardian", "watcher",
    "observer", "listener", "scanner", "analyzer", "detector", "forge", "anvil", "hammer",
    "blade", "sword", "lance", "spear", "arrow", "shield", "armor", "helm", "gauntlet",
    "greaves", "plate", "mail", "chain", "crystal", "prism", "lens", "mirror", "beacon",
    "torch", "flame", "spark", "storm", "tempest", "cyclone", "tornado", "typhoon",
    "hurricane", "blizzard", "avalanche", "thunder", "lightning", "bolt", "flash", "pulse",
    "wave", "surge", "spike", "nexus", "vertex", "apex", "zenith", "peak", "summit",
    "crest", "crown", "foundry", "reactor", "generator", "engine", "turbine", "dynamo",
    "motor", "spectrum", "array", "matrix", "grid", "mesh", "lattice", "framework",
    "scaffold", "enigma", "puzzle", "riddle", "mystery", "secret", "paradox", "anomaly",
    "cosmos", "galaxy", "nebula", "quasar", "pulsar", "nova", "supernova", "blackhole",
    "photon", "electron", "neutron", "proton", "quark", "boson", "lepton", "hadron",
    "atom", "molecule", "particle", "ion", "isotope", "element", "compound", "vector",
    "tensor", "scalar", "sequence", "series", "pattern", "catalyst", "chamber", "vessel",
    "container", "capsule", "pod", "shell", "vanguard", "bastion", "bulwark", "fortress",
    "citadel", "stronghold", "rampart",
];

/// Is `word` one of the known adjectives?
pub fn is_adjective(word: &str) -> bool {
    ADJECTIVES.contains(&word)
}

/// Is `word` one of the known nouns?
pub fn is_noun(word: &str) -> bool {
    NOUNS.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_vocabularies_have_no_duplicates() {
        let adjectives: HashSet<_> = ADJECTIVES.iter().collect();
        let nouns: HashSet<_> = NOUNS.iter().collect();
        assert_eq!(adjectives.len(), ADJECTIVES.len());
        assert_eq!(nouns.len(), NOUNS.len());
    }

    #[test]
    fn test_words_are_single_lowercase_segments() {
        for word in ADJECTIVES.iter().chain(NOUNS.iter()) {
            assert!(!word.is_empty());
            assert!(
                word.chars().all(|c| c.is_ascii_lowercase()),
                "unexpected character in {word}"
            );
        }
    }
}
