//! Built-in regional server groups and their short aliases.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub description: &'static str,
    pub servers: &'static [&'static str],
}

const EUROPE_WEST: &[&str] = &["lhr", "fra", "par", "ams", "ams4", "mad"];
const EUROPE_EAST: &[&str] = &["sto", "sto2", "vie", "waw"];

pub const REGIONS: &[Region] = &[
    Region {
        name: "North America",
        description: "All US and Canada servers",
        servers: &["iad", "ord", "atl", "dfw", "lax", "sea"],
    },
    Region {
        name: "North America East",
        description: "US East Coast servers",
        servers: &["iad", "ord", "atl"],
    },
    Region {
        name: "North America West",
        description: "US West Coast servers",
        servers: &["dfw", "lax", "sea"],
    },
    Region {
        name: "South America",
        description: "Central and South American servers",
        servers: &["gru", "eze", "scl", "lim"],
    },
    Region {
        name: "Europe West",
        description: "Western European servers",
        servers: EUROPE_WEST,
    },
    Region {
        name: "Europe East",
        description: "Eastern European servers",
        servers: EUROPE_EAST,
    },
    Region {
        name: "Europe",
        description: "All European servers",
        servers: &[
            "lhr", "fra", "par", "ams", "ams4", "mad", "sto", "sto2", "vie", "waw",
        ],
    },
    Region {
        name: "Asia",
        description: "Asian servers (excluding China)",
        servers: &["sgp", "hkg", "hkg4", "tyo", "seo", "bom2", "maa2"],
    },
    Region {
        name: "Asia Pacific",
        description: "Asia Pacific including Australia",
        servers: &["sgp", "hkg", "hkg4", "tyo", "seo", "syd"],
    },
    Region {
        name: "China",
        description: "Chinese servers (Perfect World & others)",
        servers: &[
            "pwg", "pwj", "pwu", "pww", "pwz", "shb", "ctum", "pekm", "pvgm", "tgdm", "ctut",
            "pekt", "pvgt", "tgdt", "ctuu", "peku", "pvgu", "tgdu",
        ],
    },
    Region {
        name: "India",
        description: "Indian servers",
        servers: &["bom2", "maa2"],
    },
    Region {
        name: "Japan",
        description: "Japanese servers",
        servers: &["tyo"],
    },
    Region {
        name: "Korea",
        description: "Korean servers",
        servers: &["seo"],
    },
    Region {
        name: "Oceania",
        description: "Australia and nearby",
        servers: &["syd"],
    },
    Region {
        name: "Middle East",
        description: "Middle Eastern servers",
        servers: &["dxb"],
    },
    Region {
        name: "Africa",
        description: "African servers",
        servers: &["jnb"],
    },
];

pub const REGION_ALIASES: &[(&str, &str)] = &[
    ("na", "North America"),
    ("nae", "North America East"),
    ("naeast", "North America East"),
    ("naw", "North America West"),
    ("nawest", "North America West"),
    ("sa", "South America"),
    ("eu", "Europe"),
    ("euw", "Europe West"),
    ("eue", "Europe East"),
    ("asia", "Asia"),
    ("apac", "Asia Pacific"),
    ("cn", "China"),
    ("china", "China"),
    ("in", "India"),
    ("india", "India"),
    ("jp", "Japan"),
    ("japan", "Japan"),
    ("kr", "Korea"),
    ("korea", "Korea"),
    ("oce", "Oceania"),
    ("au", "Oceania"),
    ("me", "Middle East"),
    ("af", "Africa"),
];

/// Resolve an alias, exact name or case-insensitive name.
pub fn find_region(name_or_alias: &str) -> Option<&'static Region> {
    let lower = name_or_alias.to_lowercase();
    let name = REGION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, name)| *name)
        .unwrap_or(name_or_alias);

    REGIONS
        .iter()
        .find(|r| r.name == name)
        .or_else(|| REGIONS.iter().find(|r| r.name.to_lowercase() == name.to_lowercase()))
}

/// Server codes for a region; empty when the region is unknown.
pub fn region_servers(name_or_alias: &str) -> &'static [&'static str] {
    find_region(name_or_alias).map(|r| r.servers).unwrap_or(&[])
}

/// Description for a region; empty when unknown.
pub fn region_description(name_or_alias: &str) -> &'static str {
    find_region(name_or_alias)
        .map(|r| r.description)
        .unwrap_or("")
}

pub fn all_regions() -> &'static [Region] {
    REGIONS
}

/// Each region once, paired with its first alias in sorted alias order.
pub fn canonical_regions() -> Vec<(&'static str, &'static Region)> {
    let mut aliases: Vec<_> = REGION_ALIASES.to_vec();
    aliases.sort_by_key(|(alias, _)| *alias);

    let mut seen = HashSet::new();
    aliases
        .into_iter()
        .filter(|(_, name)| seen.insert(*name))
        .filter_map(|(alias, name)| find_region(name).map(|r| (alias, r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_lookup() {
        assert_eq!(region_servers("eu").len(), 10);
        assert_eq!(region_servers("EUW"), EUROPE_WEST);
        assert_eq!(region_servers("au"), &["syd"]);
    }

    #[test]
    fn test_name_lookup_exact_and_case_insensitive() {
        assert_eq!(region_servers("Europe East"), EUROPE_EAST);
        assert_eq!(region_servers("europe east"), EUROPE_EAST);
        assert_eq!(region_servers("JAPAN"), &["tyo"]);
    }

    #[test]
    fn test_unknown_region() {
        assert!(region_servers("atlantis").is_empty());
        assert_eq!(region_description("atlantis"), "");
    }

    #[test]
    fn test_region_description() {
        assert_eq!(region_description("me"), "Middle Eastern servers");
        assert_eq!(region_description("Africa"), "African servers");
    }

    #[test]
    fn test_every_alias_points_at_a_region() {
        for (alias, name) in REGION_ALIASES {
            assert!(
                REGIONS.iter().any(|r| r.name == *name),
                "alias {} -> {} is dangling",
                alias,
                name
            );
        }
    }

    #[test]
    fn test_europe_is_union_of_west_and_east() {
        let europe = region_servers("eu");
        for code in EUROPE_WEST.iter().chain(EUROPE_EAST) {
            assert!(europe.contains(code));
        }
    }

    #[test]
    fn test_canonical_regions() {
        let canonical = canonical_regions();
        assert_eq!(canonical.len(), REGIONS.len());

        let lookup = |name: &str| canonical.iter().find(|(_, r)| r.name == name).unwrap().0;
        assert_eq!(lookup("Oceania"), "au");
        assert_eq!(lookup("China"), "china");
        assert_eq!(lookup("North America East"), "nae");

        let aliases: Vec<_> = canonical.iter().map(|(a, _)| *a).collect();
        let mut sorted = aliases.clone();
        sorted.sort();
        assert_eq!(aliases, sorted);
    }
}
