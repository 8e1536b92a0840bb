//! Settings store properties.
//!
//! Newest definition wins for any insertion sequence; reset followed by
//! reinsertion of the same content never grows the allocations.

use egd_common::settings::Settings;
use proptest::prelude::*;
use std::collections::HashMap;

fn pairs() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-e]{1,3}", "[ -~&&[^|]]{0,40}"), 0..120)
}

proptest! {
    #[test]
    fn newest_definition_wins(entries in pairs()) {
        let mut settings = Settings::new();
        let mut expected = HashMap::new();
        for (name, value) in &entries {
            settings.add(name, value).unwrap();
            expected.insert(name.clone(), value.clone());
        }

        prop_assert_eq!(settings.len(), entries.len());
        for (name, value) in &expected {
            prop_assert_eq!(settings.get(name), Some(value.as_str()));
        }
        prop_assert!(settings.get("zzz").is_none());
    }

    #[test]
    fn reset_then_reinsert_needs_no_growth(entries in pairs()) {
        let mut settings = Settings::new();
        for (name, value) in &entries {
            settings.add(name, value).unwrap();
        }
        let buffer_cap = settings.buffer_capacity();
        let entries_cap = settings.entries_capacity();

        settings.reset();
        prop_assert!(settings.is_empty());
        for (name, value) in &entries {
            settings.add(name, value).unwrap();
        }
        prop_assert_eq!(settings.buffer_capacity(), buffer_cap);
        prop_assert_eq!(settings.entries_capacity(), entries_cap);
    }

    #[test]
    fn option_string_matches_individual_adds(entries in pairs()) {
        let joined = entries
            .iter()
            .flat_map(|(n, v)| [n.as_str(), v.as_str()])
            .collect::<Vec<_>>()
            .join("|");

        let parsed = Settings::parse_options(&joined).unwrap();
        let mut direct = Settings::new();
        for (name, value) in &entries {
            direct.add(name, value).unwrap();
        }
        for (name, _) in &entries {
            prop_assert_eq!(parsed.get(name), direct.get(name));
        }
    }
}
