use crate::vocabulary::ExtractionConfig;

pub fn build_extraction_prompt(chunk_text: &str, config: &ExtractionConfig) -> String {
    let vocabulary = &config.vocabulary;

    format!(
        r#"Extract a knowledge graph of entities and relationships from the following text.

INSTRUCTIONS:
1. Identify the key entities and the relationships between them
2. Output ONLY valid JSON, nothing else
3. Use the exact schema below

SCHEMA:
{{
  "nodes": [
    {{"id": "Entity name", "label": "NodeLabel", "properties": {{"name": "Entity name"}}}}
  ],
  "relationships": [
    {{"type": "RELATIONSHIP_TYPE", "start_node_id": "Entity name", "end_node_id": "Other entity", "properties": {{"details": "short description"}}}}
  ]
}}

RULES:
- Node labels must be one of: {labels}
- Relationship types must be one of: {types}
- Use the entity name as the node id
- start_node_id and end_node_id must be ids of nodes listed in "nodes"
- Do not invent labels or relationship types outside the lists above
- Output ONLY the JSON object, no markdown, no explanations
{examples}
TEXT:
{text}

JSON OUTPUT:"#,
        labels = vocabulary.node_labels().join(", "),
        types = vocabulary.relationship_types().join(", "),
        examples = render_examples(config),
        text = chunk_text,
    )
}

fn render_examples(config: &ExtractionConfig) -> String {
    if config.examples.is_empty() {
        return String::new();
    }

    let mut out = String::from("\nEXAMPLES:\n");
    for (i, example) in config.examples.iter().enumerate() {
        let output = serde_json::to_string(&example.output).unwrap_or_default();
        out.push_str(&format!(
            "Example {}\nText: {}\nOutput: {}\n\n",
            i + 1,
            example.text,
            output
        ));
    }
    out
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. It must be an object with "nodes" and "relationships" arrays. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
