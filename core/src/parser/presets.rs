//! Rule sets for the bundled integrations.

use super::RuleSpec;

/// Dungeon crawler (`hethack`): depth changes, the amulet, deaths.
pub fn dungeon_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new(
            r"(?i)\b(?:dlvl|dungeon level|level)[:\s]+(?P<depth>\d+)\b",
            "HETHACK_LEVEL_REACHED",
        ),
        RuleSpec::new(
            r"(?i)\b(?:you (?:pick up|now have|retrieve)|retrieved)\b.*\bamulet of yendor\b",
            "HETHACK_AMULET_RETRIEVED",
        ),
        RuleSpec::new(
            r"(?i)\byou die\b|\bkilled by (?P<cause>[^.!]+)",
            "HETHACK_DEATH",
        ),
    ]
}

/// Space trader (`elite`): jumps, docking, missions, trade results.
pub fn galaxy_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new(
            r"(?i)\bhyperspace\b(?:.*\bto\s+(?P<destination>[A-Za-z][\w-]*))?",
            "ELITE_HYPERSPACE_JUMP",
        ),
        RuleSpec::new(
            r"(?i)\bdocked\b(?:.*\bat\s+(?P<station>[A-Za-z][\w -]*\w))?",
            "ELITE_DOCKED",
        ),
        RuleSpec::new(
            r"(?i)\bmission (?:complete|accomplished)\b",
            "ELITE_MISSION_COMPLETE",
        ),
        RuleSpec::new(
            r"(?i)\bprofit\b[:\s]+(?:cr\s*)?(?P<profit>-?\d+)",
            "ELITE_TRADE_PROFIT",
        ),
    ]
}
