//! Prompt templates for extraction, keyword extraction, summarization and
//! answer generation
//!
//! Placeholders use `{name}` and are filled with [`fill`].

/// Field separator of the delimited record format
pub const TUPLE_DELIMITER: &str = "<#>";

/// Sentinel the model emits after its last record
pub const COMPLETION_DELIMITER: &str = "<|COMPLETE|>";

/// Entity and relationship extraction prompt
pub const ENTITY_EXTRACTION_PROMPT: &str = r#"---Goal---
Given a text document and a list of entity types, identify all entities of those types in the text and all relationships among the identified entities.
Use {language} as output language.

---Steps---
1. Identify all entities. For each entity, output one line:
entity{tuple_delimiter}<entity_name>{tuple_delimiter}<entity_type>{tuple_delimiter}<entity_description>
- entity_name: name of the entity, capitalized as in the text
- entity_type: one of [{entity_types}]
- entity_description: comprehensive description of the entity's attributes and activities

2. From the entities in step 1, identify every pair (source, target) that is clearly related. For each pair, output one line:
relation{tuple_delimiter}<source_entity>{tuple_delimiter}<target_entity>{tuple_delimiter}<relationship_keywords>{tuple_delimiter}<relationship_description>{tuple_delimiter}<relationship_strength>
- relationship_keywords: comma-separated high-level keywords summarizing the relationship
- relationship_description: why the source and target are related
- relationship_strength: a positive number rating the strength of the relationship

3. Output one record per line and nothing else. When finished, output {completion_delimiter}

---Example---
Text: Alice founded Acme Corp in Berlin.
Output:
entity{tuple_delimiter}Alice{tuple_delimiter}person{tuple_delimiter}Alice is the founder of Acme Corp.
entity{tuple_delimiter}Acme Corp{tuple_delimiter}organization{tuple_delimiter}Acme Corp is a company founded by Alice in Berlin.
entity{tuple_delimiter}Berlin{tuple_delimiter}geo{tuple_delimiter}Berlin is the city where Acme Corp was founded.
relation{tuple_delimiter}Alice{tuple_delimiter}Acme Corp{tuple_delimiter}founding, leadership{tuple_delimiter}Alice founded Acme Corp.{tuple_delimiter}9
relation{tuple_delimiter}Acme Corp{tuple_delimiter}Berlin{tuple_delimiter}location{tuple_delimiter}Acme Corp was founded in Berlin.{tuple_delimiter}6
{completion_delimiter}

---Real Data---
Entity types: [{entity_types}]
Text:
{input_text}

Output:
"#;

/// Query keyword extraction prompt
pub const KEYWORD_EXTRACTION_PROMPT: &str = r#"---Role---
You identify high-level and low-level keywords in a user query.

---Goal---
Return JSON with this exact structure:
{
  "high_level_keywords": ["theme1", "theme2"],
  "low_level_keywords": ["entity1", "entity2"]
}
- high_level_keywords: broad concepts and themes of the query
- low_level_keywords: specific entities, names and concrete details
Keep keywords concise. Use {language} as output language.

---Example---
Query: "How did Alice and Bob collaborate on the quantum computing project?"
{
  "high_level_keywords": ["collaboration", "quantum computing"],
  "low_level_keywords": ["Alice", "Bob", "project"]
}

---Real Data---
Query: "{query}"
Output:
"#;

/// Description summarization prompt
pub const SUMMARIZE_DESCRIPTIONS_PROMPT: &str = r#"You are a helpful assistant responsible for writing a comprehensive summary of the data below.
Given a {description_type} named {description_name} and a list of descriptions of it, merge them into one cohesive description in the third person that covers every distinct fact. Resolve contradictions into a single coherent account.
Use {language} as output language and stay within roughly {summary_length} tokens.

Name: {description_name}
Descriptions:
{description_list}

Output:
"#;

/// System prompt for answering a query from retrieved context
pub const RAG_RESPONSE_PROMPT: &str = r#"---Role---
You are a helpful assistant answering questions about the knowledge base below.

---Goal---
Answer the user's question using only the Knowledge Base. Summarize the relevant information and state when the answer is not contained in it. Do not make anything up.
When citing, use the file names shown in square brackets in the Sources section.

---Target response length and format---
{response_type}

{user_prompt}

---Knowledge Base---
{context_data}
"#;

/// Replace each `{name}` placeholder in `template` with its value
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}
