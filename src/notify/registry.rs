use std::collections::HashMap;

const DEFAULT_FAN_LABEL: &str = "fans";

/// How a registry compares channel identifiers. Twitch logins are case-insensitive, YouTube
/// channel ids are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
    Exact,
    IgnoreCase,
}

/// Display name and fan label shared by every channel list, by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamerProfiles {
    pub display_names: Vec<String>,
    pub fan_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    pub fan_label: String,
}

/// Maps a channel identifier to its configured position and from there to a [`Profile`].
/// Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    index: HashMap<String, usize>,
    profiles: StreamerProfiles,
    matching: Matching,
}

impl ChannelRegistry {
    pub fn new(channels: &[String], profiles: StreamerProfiles, matching: Matching) -> Self {
        let index = channels
            .iter()
            .enumerate()
            .map(|(idx, channel)| (fold(channel, matching), idx))
            .collect();
        ChannelRegistry {
            index,
            profiles,
            matching,
        }
    }

    /// Never fails: positions past the end of either list get `Streamer{index}` / `fans`.
    pub fn resolve(&self, index: usize) -> Profile {
        Profile {
            display_name: self
                .profiles
                .display_names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("Streamer{index}")),
            fan_label: self
                .profiles
                .fan_labels
                .get(index)
                .cloned()
                .unwrap_or_else(|| DEFAULT_FAN_LABEL.to_owned()),
        }
    }

    /// Position of `channel` in the configured list. Unknown channels fall back to the first
    /// entry.
    pub fn index_of(&self, channel: &str) -> usize {
        self.index
            .get(&fold(channel, self.matching))
            .copied()
            .unwrap_or_default()
    }

    pub fn lookup(&self, channel: &str) -> Profile {
        self.resolve(self.index_of(channel))
    }
}

fn fold(channel: &str, matching: Matching) -> String {
    match matching {
        Matching::Exact => channel.to_owned(),
        Matching::IgnoreCase => channel.to_lowercase(),
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn registry(matching: Matching) -> ChannelRegistry {
        ChannelRegistry::new(
            &strings(&["alice", "bob"]),
            StreamerProfiles {
                display_names: strings(&["Alice"]),
                fan_labels: vec![],
            },
            matching,
        )
    }

    #[rstest]
    #[case(0, "Alice", "fans")]
    #[case(1, "Streamer1", "fans")]
    #[case(7, "Streamer7", "fans")]
    fn resolve_with_defaults(#[case] index: usize, #[case] name: &str, #[case] fans: &str) {
        let profile = registry(Matching::Exact).resolve(index);
        assert_eq!(profile.display_name, name);
        assert_eq!(profile.fan_label, fans);
    }

    #[test]
    fn resolve_within_bounds() {
        let registry = ChannelRegistry::new(
            &strings(&["a", "b", "c"]),
            StreamerProfiles {
                display_names: strings(&["A", "B", "C"]),
                fan_labels: strings(&["ants", "bees", "cats"]),
            },
            Matching::Exact,
        );
        for (idx, (name, fans)) in [("A", "ants"), ("B", "bees"), ("C", "cats")]
            .into_iter()
            .enumerate()
        {
            assert_eq!(
                registry.resolve(idx),
                Profile {
                    display_name: name.to_owned(),
                    fan_label: fans.to_owned()
                }
            );
        }
    }

    #[test]
    fn lookup_ignores_case_for_logins() {
        let registry = registry(Matching::IgnoreCase);
        assert_eq!(registry.index_of("BoB"), 1);
        assert_eq!(registry.lookup("BOB").display_name, "Streamer1");
    }

    #[test]
    fn lookup_exact_for_channel_ids() {
        let registry = registry(Matching::Exact);
        assert_eq!(registry.index_of("bob"), 1);
        assert_eq!(registry.index_of("Bob"), 0);
    }

    #[test]
    fn unknown_channel_uses_first_entry() {
        assert_eq!(registry(Matching::Exact).lookup("carol").display_name, "Alice");
    }
}
