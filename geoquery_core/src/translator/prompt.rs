use super::TranslationMode;
use crate::analyzer::QueryAnalysis;
use crate::catalog::SchemaCatalog;
use crate::data::CountryRecord;
use crate::inference::ChatMessage;

const GUIDELINES: &[&str] = &[
    "ALWAYS include 'name' and 'ISO_A3' in the SELECT clause",
    "Use LIKE '%value%' for partial string matches (case-insensitive)",
    "Fields like 'languages', 'currencies', 'borders' contain comma-separated values",
    "For flag queries, use the 'flagDescription' field",
    "Population and area are numeric fields, use comparison operators (>, <, =)",
    "Common regions: Europe, Asia, Africa, Americas, Oceania",
    "Add ORDER BY name for consistent results",
    "Only ever produce a single SELECT statement",
];

const EXAMPLES: &[(&str, &str)] = &[
    (
        "Countries in Europe",
        "SELECT name, ISO_A3 FROM countries WHERE region = 'Europe' ORDER BY name",
    ),
    (
        "Largest countries by area",
        "SELECT name, ISO_A3 FROM countries ORDER BY area DESC LIMIT 10",
    ),
    (
        "Spanish speaking countries",
        "SELECT name, ISO_A3 FROM countries WHERE languages LIKE '%Spanish%' ORDER BY name",
    ),
    (
        "Countries with red flags",
        "SELECT name, ISO_A3 FROM countries WHERE flagDescription LIKE '%red%' ORDER BY name",
    ),
    (
        "European countries with crosses on their flags",
        "SELECT name, ISO_A3 FROM countries WHERE region = 'Europe' AND flagDescription LIKE '%cross%' ORDER BY name",
    ),
    (
        "Countries bordering France",
        "SELECT name, ISO_A3 FROM countries WHERE borders LIKE '%France%' ORDER BY name",
    ),
    (
        "Countries with population over 100M",
        "SELECT name, ISO_A3 FROM countries WHERE population > 100000000 ORDER BY population DESC",
    ),
];

const STRUCTURED_FORMAT: &str = r#"Respond with ONLY a JSON object in this exact format:
{
  "sql": "THE_SQL_QUERY_HERE",
  "explanation": "Brief explanation of what this query does",
  "queryType": "geographic|population|language|flag|complex|other",
  "confidence": 0.95
}"#;

/// Builds the chat messages for one translation request.
pub struct PromptBuilder<'a> {
    catalog: &'a SchemaCatalog,
    sample: Option<&'a CountryRecord>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(catalog: &'a SchemaCatalog, sample: Option<&'a CountryRecord>) -> Self {
        Self { catalog, sample }
    }

    pub fn system_prompt(&self, mode: TranslationMode, analysis: Option<&QueryAnalysis>) -> String {
        let mut prompt = String::from(
            "You are a SQL expert helping users explore world countries data. \
             Translate the user's request into a single SQLite SELECT query.\n\n",
        );

        if let (TranslationMode::Structured, Some(analysis)) = (mode, analysis) {
            prompt.push_str("QUERY ANALYSIS:\n");
            prompt.push_str(&format!("Intent: {}\n", analysis.intent));
            prompt.push_str(&format!("Complexity: {}\n", analysis.complexity));
            let entities = serde_json::to_string(&analysis.entities).unwrap_or_default();
            prompt.push_str(&format!("Extracted entities: {}\n", entities));
            if !analysis.suggestions.is_empty() {
                prompt.push_str(&format!("Suggestions: {}\n", analysis.suggestions.join(", ")));
            }
            prompt.push('\n');
        }

        prompt.push_str("DATABASE SCHEMA:\n");
        prompt.push_str(&format!("Table: {}\n", self.catalog.table_name()));
        prompt.push_str(&format!(
            "Available fields: {}\n\n",
            self.catalog.list_columns().join(", ")
        ));

        if let Some(sample) = self.sample {
            if let Ok(json) = serde_json::to_string_pretty(sample) {
                prompt.push_str("SAMPLE DATA:\n");
                prompt.push_str(&json);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str("IMPORTANT GUIDELINES:\n");
        for (i, guideline) in GUIDELINES.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, guideline));
        }

        prompt.push_str("\nEXAMPLES:\n");
        for (question, sql) in EXAMPLES {
            prompt.push_str(&format!("- \"{}\" -> {}\n", question, sql));
        }

        prompt.push('\n');
        match mode {
            TranslationMode::Plain => {
                prompt.push_str("Return only the SQL query, without explanation or formatting.")
            }
            TranslationMode::Structured => prompt.push_str(STRUCTURED_FORMAT),
        }

        prompt
    }

    pub fn messages(
        &self,
        mode: TranslationMode,
        user_text: &str,
        analysis: Option<&QueryAnalysis>,
    ) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt(mode, analysis)),
            ChatMessage::user(user_text),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::QueryAnalyzer;

    #[test]
    fn test_plain_prompt_lists_columns() {
        let catalog = SchemaCatalog::standard();
        let builder = PromptBuilder::new(&catalog, None);
        let prompt = builder.system_prompt(TranslationMode::Plain, None);

        assert!(prompt.contains("Table: countries"));
        assert!(prompt.contains("name, ISO_A3, ISO_A2, population"));
        assert!(prompt.contains("flagDescription LIKE '%red%'"));
        assert!(!prompt.contains("SAMPLE DATA"));
        assert!(!prompt.contains("\"queryType\""));
    }

    #[test]
    fn test_structured_prompt_has_analysis_and_sample() {
        let catalog = SchemaCatalog::standard();
        let mut sample = CountryRecord::new("IRL", "Ireland");
        sample.region = Some("Europe".into());
        let builder = PromptBuilder::new(&catalog, Some(&sample));

        let analysis = QueryAnalyzer::analyze("Countries in Europe");
        let messages = builder.messages(TranslationMode::Structured, "Countries in Europe", Some(&analysis));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("Intent: geographic"));
        assert!(messages[0].content.contains("\"ISO_A3\": \"IRL\""));
        assert!(messages[0].content.contains("\"queryType\""));
        assert_eq!(messages[1], ChatMessage::user("Countries in Europe"));
    }
}
