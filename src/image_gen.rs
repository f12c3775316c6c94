use crate::error::{PipelineError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Image-generation capability. Returns the local path of the saved image.
pub trait ImageProvider {
    fn generate(&self, prompt: &str) -> Result<PathBuf>;
}

/// Sliding one-minute window allowing at most `per_minute` acquisitions.
pub struct RateLimiter {
    per_minute: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(per_minute: usize) -> Self {
        Self::with_window(per_minute, Duration::from_secs(60))
    }

    fn with_window(per_minute: usize, window: Duration) -> Self {
        Self {
            per_minute: per_minute.max(1),
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// How long the caller must wait before a slot opens; records the call
    /// when a slot is free.
    fn try_acquire(&self, now: Instant) -> Option<Duration> {
        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        while calls
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            calls.pop_front();
        }
        if calls.len() < self.per_minute {
            calls.push_back(now);
            return None;
        }
        let earliest = *calls.front()?;
        Some(self.window.saturating_sub(now.duration_since(earliest)))
    }

    pub fn acquire(&self) {
        while let Some(wait) = self.try_acquire(Instant::now()) {
            info!("Image rate limit reached, waiting {:.1}s", wait.as_secs_f64());
            std::thread::sleep(wait);
        }
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    image_size: &'a str,
    batch_size: u32,
    num_inference_steps: u32,
    guidance_scale: f64,
}

pub struct SiliconFlowImage {
    client: reqwest::blocking::Client,
    api_key: String,
    endpoint: String,
    model: String,
    image_size: String,
    output_dir: PathBuf,
    limiter: RateLimiter,
}

impl SiliconFlowImage {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        images_per_minute: usize,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            image_size: "1024x1024".into(),
            output_dir: output_dir.into(),
            limiter: RateLimiter::new(images_per_minute),
        })
    }

    fn download(&self, url: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(download_name(url));
        let bytes = self.client.get(url).send()?.error_for_status()?.bytes()?;
        fs::write(&path, &bytes)?;
        Ok(if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        })
    }
}

impl ImageProvider for SiliconFlowImage {
    fn generate(&self, prompt: &str) -> Result<PathBuf> {
        self.limiter.acquire();
        debug!("POST {} ({} chars prompt)", self.endpoint, prompt.chars().count());
        let data: Value = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ImageRequest {
                model: &self.model,
                prompt,
                image_size: &self.image_size,
                batch_size: 1,
                num_inference_steps: 20,
                guidance_scale: 7.5,
            })
            .send()?
            .error_for_status()?
            .json()?;
        let url = first_image_url(&data)
            .ok_or_else(|| PipelineError::Provider("no image URL in response".into()))?;
        let path = self.download(&url)?;
        info!("Saved image {}", path.display());
        Ok(path)
    }
}

/// Looks in `images[].url`, then `data[].url`, then any list of objects.
fn first_image_url(data: &Value) -> Option<String> {
    let from_list = |v: &Value| -> Option<String> {
        v.as_array()?
            .iter()
            .find_map(|item| item.get("url")?.as_str().map(str::to_string))
    };
    let obj = data.as_object()?;
    obj.get("images")
        .and_then(from_list)
        .or_else(|| obj.get("data").and_then(from_list))
        .or_else(|| obj.values().find_map(from_list))
}

/// Local file name for a downloaded image: the URL's base name with a short
/// random suffix, `.png` when the URL has no extension.
fn download_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let base = without_query.rsplit('/').next().unwrap_or("");
    let base = Path::new(base);
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("image_{}", chrono::Utc::now().timestamp()));
    let ext = base.extension().and_then(|e| e.to_str()).unwrap_or("png");
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}.{}", stem, &rand[..8], ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_url_in_known_shapes() {
        let a = json!({"images": [{"url": "https://x/a.png"}]});
        let b = json!({"data": [{"url": "https://x/b.png"}]});
        let c = json!({"results": [{"seed": 1}, {"url": "https://x/c.png"}]});
        assert_eq!(first_image_url(&a).as_deref(), Some("https://x/a.png"));
        assert_eq!(first_image_url(&b).as_deref(), Some("https://x/b.png"));
        assert_eq!(first_image_url(&c).as_deref(), Some("https://x/c.png"));
        assert_eq!(first_image_url(&json!({"images": []})), None);
    }

    #[test]
    fn download_names() {
        let name = download_name("https://cdn.example/out/cat.jpeg?sig=abc");
        assert!(name.starts_with("cat_"));
        assert!(name.ends_with(".jpeg"));
        let name = download_name("https://cdn.example/out/render");
        assert!(name.starts_with("render_") && name.ends_with(".png"));
    }

    #[test]
    fn limiter_blocks_after_quota() {
        let limiter = RateLimiter::with_window(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.try_acquire(t0).is_none());
        assert!(limiter.try_acquire(t0).is_none());
        let wait = limiter.try_acquire(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(wait, Duration::from_secs(50));
        assert!(limiter.try_acquire(t0 + Duration::from_secs(61)).is_none());
    }
}
