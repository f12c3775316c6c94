use crate::error::{PipelineError, Result};
use crate::llm::{ChatMessage, LlmProvider};
use crate::speech_batch::ScriptRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{info, warn};

static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\s*").unwrap());
static HEADING_MARKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#+\s*").unwrap());

/// A section of script before sentence splitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Script item together with its split sentences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedItem {
    pub title: String,
    pub content: String,
    pub sentences: Vec<String>,
}

impl From<&ExpandedItem> for ScriptRecord {
    fn from(item: &ExpandedItem) -> Self {
        ScriptRecord {
            title: item.title.clone(),
            sentences: item.sentences.clone(),
        }
    }
}

pub fn markdown_to_script(markdown: &str) -> Vec<ScriptItem> {
    let mut output = Vec::new();
    let mut title: Option<String> = None;
    let mut body: Vec<String> = Vec::new();

    for raw in markdown.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("![") {
            continue;
        }
        let heading = line
            .strip_prefix("# ")
            .or_else(|| line.strip_prefix("## "));
        if let Some(heading) = heading {
            if let Some(t) = title.take() {
                output.push(ScriptItem {
                    title: t,
                    content: body.join("\n"),
                });
            }
            // text before the first heading belongs to no section
            body.clear();
            title = Some(heading.to_string());
            continue;
        }
        let clean = EMPHASIS.replace_all(line, "");
        let clean = HEADING_MARKS.replace_all(&clean, "");
        let clean = clean.trim_matches('*').trim();
        if !clean.is_empty() {
            body.push(clean.to_string());
        }
    }
    if let Some(t) = title {
        output.push(ScriptItem {
            title: t,
            content: body.join("\n"),
        });
    }
    output
}

const SENTENCE_BREAKS: [char; 5] = ['，', '。', '；', '？', '！'];

fn closing_bracket(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        '（' => Some('）'),
        '【' => Some('】'),
        '《' => Some('》'),
        _ => None,
    }
}

/// Splits on full-width sentence punctuation outside brackets and on ASCII
/// spaces. The punctuation itself is dropped.
pub fn split_text_for_tts(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut stack: Vec<char> = Vec::new();

    let flush = |current: &mut String, sentences: &mut Vec<String>| {
        let s = current.trim();
        if !s.is_empty() {
            sentences.push(s.to_string());
        }
        current.clear();
    };

    for ch in text.chars() {
        if closing_bracket(ch).is_some() {
            stack.push(ch);
        } else if stack.last().and_then(|o| closing_bracket(*o)) == Some(ch) {
            stack.pop();
        }

        if SENTENCE_BREAKS.contains(&ch) && stack.is_empty() {
            flush(&mut current, &mut sentences);
        } else if ch == ' ' {
            if !current.trim().is_empty() {
                flush(&mut current, &mut sentences);
            }
        } else {
            current.push(ch);
        }
    }
    flush(&mut current, &mut sentences);
    sentences
}

pub fn expand_script_items(items: &[ScriptItem]) -> Vec<ExpandedItem> {
    items
        .iter()
        .map(|item| ExpandedItem {
            title: item.title.clone(),
            content: item.content.clone(),
            sentences: split_text_for_tts(&item.content),
        })
        .collect()
}

/// Removes a ```` ```json ```` / ```` ``` ```` wrapper from an LLM reply.
pub fn strip_code_fence(raw: &str) -> &str {
    let s = raw.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

const OPTIMIZE_SYSTEM: &str = "You are an expert at preparing scripts for voice recording.";

/// Rewrites each item's content into plain spoken text.
pub fn optimize_script_for_speech(
    items: &[ScriptItem],
    llm: &dyn LlmProvider,
) -> Result<Vec<ScriptItem>> {
    let payload = serde_json::to_string(items)?;
    let prompt = format!(
        r#"Rewrite the "content" field of every object in the JSON below into plain text suitable for recording:
1. Expand abbreviations of technical terms into their full names.
2. Remove markdown such as asterisks and hash marks.
3. Remove line breaks and paragraph separators.
4. Break long, complex sentences into shorter ones.

{payload}

Return only JSON that a strict parser accepts: double-quoted strings, commas between
array elements, no code fences and no commentary. Example:
[
    {{"title": "Cloud computing", "content": "Cloud computing delivers servers, storage and software over the internet on demand."}}
]"#
    );
    let raw = llm.chat(&[ChatMessage::system(OPTIMIZE_SYSTEM), ChatMessage::user(prompt)])?;
    let body = strip_code_fence(&raw);
    let optimized: Vec<ScriptItem> = serde_json::from_str(body).map_err(|e| {
        PipelineError::Provider(format!(
            "could not parse optimized script: {} ... -> {}",
            body.chars().take(200).collect::<String>(),
            e
        ))
    })?;
    if optimized.len() != items.len() {
        warn!(
            "Optimized script has {} items, input had {}",
            optimized.len(),
            items.len()
        );
    }
    Ok(optimized)
}

const SCRIPT_EXAMPLE: &str = "\
## Introduction to cloud computing

Cloud computing delivers computing resources such as servers, storage and software over the internet.
It lets companies scale flexibly and lower infrastructure costs.

## Main types of cloud

- Public cloud: shared by many tenants of one provider.
- Private cloud: dedicated to a single organisation.
- Hybrid cloud: combines both and moves workloads between them.
";

const SCRIPT_SYSTEM: &str = "\
You write structured markdown scripts for narrated tutorial videos.
1) Tutorial tone aimed at beginners;
2) split the material into several ## sections;
3) natural, spoken language that reads well aloud;
4) short paragraphs of one to three sentences;
5) no extra preamble or closing remarks.";

pub struct ScriptRequest<'a> {
    pub topic: Option<&'a str>,
    pub raw_content: Option<&'a str>,
    pub language: &'a str,
    pub max_sections: Option<usize>,
}

fn script_user_prompt(req: &ScriptRequest<'_>) -> Result<String> {
    let mut parts = Vec::new();
    if let Some(topic) = req.topic.filter(|t| !t.trim().is_empty()) {
        parts.push(format!("Topic: {}", topic.trim()));
    }
    if let Some(raw) = req.raw_content.filter(|t| !t.trim().is_empty()) {
        parts.push(format!("Key points: {}", raw.trim()));
    }
    if parts.is_empty() {
        return Err(PipelineError::InvalidInput(
            "either a topic or raw content is required".into(),
        ));
    }
    let sections = req
        .max_sections
        .map(|n| format!(" Use at most {} ## sections.", n))
        .unwrap_or_default();
    parts.push(format!("Output language: {}.{}", req.language, sections));
    parts.push("Output only the markdown body, without explanations.".into());
    parts.push(format!(
        "Format example (follow the structure, not the content):\n```\n{}\n```",
        SCRIPT_EXAMPLE
    ));
    Ok(parts.join("\n"))
}

/// Produces a markdown script for a topic or a set of raw notes.
pub fn generate_markdown_script(req: &ScriptRequest<'_>, llm: &dyn LlmProvider) -> Result<String> {
    let prompt = script_user_prompt(req)?;
    info!("Generating markdown script ({})", req.language);
    llm.chat(&[ChatMessage::system(SCRIPT_SYSTEM), ChatMessage::user(prompt)])
}
