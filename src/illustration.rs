use crate::error::{PipelineError, Result};
use crate::image_gen::ImageProvider;
use crate::llm::{ChatMessage, LlmProvider};
use crate::script::strip_code_fence;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IllustrationPrompt {
    #[serde(default)]
    pub illustration_id: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IllustrationAsset {
    pub scene_index: usize,
    pub title: String,
    pub prompt: String,
    pub image_path: PathBuf,
}

const PROMPT_SYSTEM: &str = "You write detailed illustration prompts for short educational videos.";

fn prompt_request(script_json: &str) -> String {
    format!(
        r#"Create one illustration for each section of the script below: {script_json}

Each description covers the subject, the scene (setting, colours, light, mood),
the main objects, what they are doing, the artistic style, and any extra
details such as textures or background elements.

Return only a JSON array in this shape, with no commentary:
[
    {{"illustration_id": 1, "title": "A sunny day", "description": "..."}},
    {{"illustration_id": 2, "title": "Starry night", "description": "..."}}
]"#
    )
}

/// Asks the LLM for one illustration prompt per script section.
pub fn generate_illustration_prompts(
    script_json: &str,
    llm: &dyn LlmProvider,
) -> Result<Vec<IllustrationPrompt>> {
    let messages = [
        ChatMessage::system(PROMPT_SYSTEM),
        ChatMessage::user(prompt_request(script_json)),
    ];
    let raw = llm.chat(&messages)?;
    let body = strip_code_fence(&raw);
    serde_json::from_str(body).map_err(|e| {
        PipelineError::Provider(format!(
            "could not parse illustration prompts: {} ... -> {}",
            body.chars().take(200).collect::<String>(),
            e
        ))
    })
}

/// Generates one image per prompt, in prompt order.
pub fn build_illustration_assets(
    prompts: &[IllustrationPrompt],
    images: &dyn ImageProvider,
) -> Result<Vec<IllustrationAsset>> {
    let mut assets = Vec::with_capacity(prompts.len());
    for (i, prompt) in prompts.iter().enumerate() {
        info!("Generating illustration {}/{}: {}", i + 1, prompts.len(), prompt.title);
        let image_path = images.generate(&prompt.description)?;
        assets.push(IllustrationAsset {
            scene_index: prompt.illustration_id,
            title: prompt.title.clone(),
            prompt: prompt.description.clone(),
            image_path,
        });
    }
    Ok(assets)
}
