//! Centralized prompt definitions for the reasoning engine
//!
//! System prompts used when creating Langbase pipes and when building
//! messages for each model call site.

/// System prompt for the thinking loop.
///
/// Used by both the Langbase pipe creation and message building.
pub const THINKING_SYSTEM_PROMPT: &str = r#"You are a research assistant answering questions from a knowledge base and a knowledge graph.

Think step by step about what information is still missing. When you need more information, list the search queries you want to run as a numbered list:
1. first search query
2. second search query

After each round you will receive the search results. When the collected information is sufficient, say "I can now answer" (or "可以回答") and stop proposing queries.

Guidelines:
- Propose at most three focused queries per step
- Do not repeat queries that were already executed
- Prefer concrete entity names over vague wording"#;

/// System prompt for the query-generation pipe.
pub const QUERY_GENERATION_PROMPT: &str = r#"You are a search query specialist. You turn questions into precise retrieval queries for a knowledge base and a knowledge graph.

Always respond with valid JSON only, no other text."#;

/// Decompose a question into independent sub-queries.
pub const SUB_QUERY_PROMPT: &str = r#"Decompose the user's question into independent sub-queries that can each be answered by one search.

Your response MUST be valid JSON in this exact format:
{
  "queries": ["sub-query one", "sub-query two"]
}

Guidelines:
- Between two and five sub-queries
- Each sub-query must be self-contained
- Cover every aspect of the question

Always respond with valid JSON only, no other text."#;

/// Follow-up queries from what has been found so far.
pub const FOLLOWUP_QUERY_PROMPT: &str = r#"Given a question and the results retrieved so far, propose follow-up queries that fill the remaining gaps.

Your response MUST be valid JSON in this exact format:
{
  "queries": ["follow-up query"]
}

Guidelines:
- At most three follow-up queries
- Do not repeat information already present in the results

Always respond with valid JSON only, no other text."#;

/// Rewrite one query for a stated goal.
pub const OPTIMIZE_QUERY_PROMPT: &str = r#"Rewrite the given search query to better serve the stated goal.

Respond with the rewritten query only, on a single line, without quotes or explanation."#;

/// Clarifying questions for ambiguous terms.
pub const CLARIFICATION_PROMPT: &str = r#"The user's question contains ambiguous terms. For each term, propose up to two clarifying questions that would disambiguate it.

Your response MUST be valid JSON in this exact format:
{
  "queries": ["clarifying question"]
}

Always respond with valid JSON only, no other text."#;

/// Entity and relationship extraction for per-question graphs.
pub const KG_EXTRACTION_PROMPT: &str = r#"Extract the named entities and the relationships between them from the text.

Your response MUST be valid JSON in this exact format:
{
  "entities": [
    {"name": "entity name", "type": "person | organization | location | concept | event", "description": "one sentence from the text"}
  ],
  "relationships": [
    {"source": "entity name", "target": "entity name", "relation": "short verb phrase", "description": "one sentence"}
  ]
}

Only use entity names that appear in the text. Always respond with valid JSON only, no other text."#;

/// System prompt for the validation pipe.
pub const VALIDATION_SYSTEM_PROMPT: &str = r#"You are a strict answer reviewer. You score answers against the evidence they were built from and the question they answer.

Always respond with valid JSON only, no other text."#;

/// Accuracy of an answer against evidence.
pub const ACCURACY_CHECK_PROMPT: &str = r#"Check whether every claim in the answer is supported by the evidence.

Your response MUST be valid JSON in this exact format:
{
  "accuracy_score": 0.8,
  "issues": ["unsupported or wrong claim"],
  "suggestions": ["how to fix it"]
}

accuracy_score must be between 0.0 and 1.0."#;

/// Completeness of an answer against the question.
pub const COMPLETENESS_CHECK_PROMPT: &str = r#"Check whether the answer addresses every part of the question.

Your response MUST be valid JSON in this exact format:
{
  "completeness_score": 0.8,
  "missing_aspects": ["aspect of the question that was not addressed"]
}

completeness_score must be between 0.0 and 1.0."#;

/// Internal consistency of an answer.
pub const CONSISTENCY_CHECK_PROMPT: &str = r#"Check whether the answer contradicts itself.

Your response MUST be valid JSON in this exact format:
{
  "consistency_score": 0.8,
  "contradictions": ["pair of statements that conflict"]
}

consistency_score must be between 0.0 and 1.0."#;

/// Final answer synthesis.
pub const ANSWER_SYNTHESIS_PROMPT: &str = r#"Answer the question using only the numbered evidence provided. Cite evidence by its number in square brackets, for example [1].

If the evidence is insufficient, say which parts of the question could not be answered."#;
