//! Keyword analysis of a user question, used to enrich the structured prompt.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

const REGIONS: &[&str] = &[
    "europe",
    "asia",
    "africa",
    "americas",
    "oceania",
    "north america",
    "south america",
];
const COUNTRIES: &[&str] = &[
    "france", "germany", "italy", "spain", "uk", "usa", "china", "japan", "india", "brazil",
];
const LANGUAGES: &[&str] = &[
    "english",
    "spanish",
    "french",
    "german",
    "portuguese",
    "arabic",
    "chinese",
];
const COLORS: &[&str] = &["red", "blue", "green", "yellow", "white", "black", "orange"];
const COMPARISONS: &[&str] = &[
    "more than",
    "less than",
    "over",
    "under",
    "above",
    "below",
    "greater",
    "smaller",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Geographic,
    Population,
    Language,
    Flag,
    Currency,
    Size,
    Border,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Geographic => "geographic",
            Intent::Population => "population",
            Intent::Language => "language",
            Intent::Flag => "flag",
            Intent::Currency => "currency",
            Intent::Size => "size",
            Intent::Border => "border",
            Intent::General => "general",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Low => f.write_str("low"),
            Complexity::Medium => f.write_str("medium"),
            Complexity::High => f.write_str("high"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entities {
    pub regions: Vec<String>,
    pub countries: Vec<String>,
    pub languages: Vec<String>,
    pub colors: Vec<String>,
    pub numbers: Vec<u64>,
    pub comparisons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub intent: Intent,
    pub entities: Entities,
    pub complexity: Complexity,
    pub suggestions: Vec<String>,
}

pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn analyze(text: &str) -> QueryAnalysis {
        let intent = Self::classify_intent(text);
        let entities = Self::extract_entities(text);
        let complexity = Self::assess_complexity(text);
        let suggestions = Self::suggestions(intent, &entities, complexity);

        QueryAnalysis {
            intent,
            entities,
            complexity,
            suggestions,
        }
    }

    /// First matching keyword group wins.
    pub fn classify_intent(text: &str) -> Intent {
        let lower = text.to_lowercase();
        let groups: &[(Intent, &[&str])] = &[
            (
                Intent::Geographic,
                &["countries in", "located in", "region", "continent"],
            ),
            (
                Intent::Population,
                &["population", "people", "inhabitants", "populous"],
            ),
            (
                Intent::Language,
                &["language", "speak", "speaking", "official language"],
            ),
            (
                Intent::Flag,
                &["flag", "color", "red flag", "blue flag", "star", "cross"],
            ),
            (
                Intent::Currency,
                &["currency", "money", "euro", "dollar", "use"],
            ),
            (
                Intent::Size,
                &["largest", "biggest", "smallest", "area", "size", "km"],
            ),
            (
                Intent::Border,
                &["border", "neighbor", "next to", "adjacent"],
            ),
        ];

        groups
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::General)
    }

    pub fn extract_entities(text: &str) -> Entities {
        let lower = text.to_lowercase();
        let found = |table: &[&str]| -> Vec<String> {
            table
                .iter()
                .filter(|item| lower.contains(*item))
                .map(|item| item.to_string())
                .collect()
        };

        Entities {
            regions: found(REGIONS),
            countries: found(COUNTRIES),
            languages: found(LANGUAGES),
            colors: found(COLORS),
            numbers: NUMBER
                .find_iter(text)
                .filter_map(|m| m.as_str().parse().ok())
                .collect(),
            comparisons: found(COMPARISONS),
        }
    }

    pub fn assess_complexity(text: &str) -> Complexity {
        let lower = text.to_lowercase();
        let mut score = 0;

        if lower.contains("and") || lower.contains("or") {
            score += 1;
        }
        if lower.contains("but") || lower.contains("except") {
            score += 1;
        }
        if lower.contains("compare") || lower.contains("vs") {
            score += 2;
        }
        if NUMBER.is_match(&lower) {
            score += 1;
        }
        if lower.split(' ').count() > 10 {
            score += 1;
        }

        match score {
            s if s >= 4 => Complexity::High,
            s if s >= 2 => Complexity::Medium,
            _ => Complexity::Low,
        }
    }

    fn suggestions(intent: Intent, entities: &Entities, complexity: Complexity) -> Vec<String> {
        let mut suggestions = Vec::new();

        match intent {
            Intent::Geographic if entities.regions.is_empty() => {
                suggestions.push("Consider specifying a region like 'Europe' or 'Asia'".to_string())
            }
            Intent::Population if entities.numbers.is_empty() => suggestions
                .push("You can specify population thresholds like 'over 100 million'".to_string()),
            Intent::Language if entities.languages.is_empty() => {
                suggestions.push("Try specifying a language like 'Spanish' or 'French'".to_string())
            }
            _ => {}
        }

        if complexity == Complexity::High {
            suggestions
                .push("This is a complex query. Consider breaking it into simpler parts.".to_string());
        }

        suggestions
    }
}
