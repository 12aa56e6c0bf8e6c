//! Configuration types for survey extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is created once at start-up
//! and shared read-only by every document in a batch.

use crate::error::SurveyError;
use crate::pipeline::llm::VisionModel;
use crate::pipeline::render::Rasterizer;
use crate::progress::ProgressCallback;
use crate::schema::ExtractionSchema;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for identifying and extracting survey pages.
///
/// # Example
/// ```rust
/// use survey_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .render_dpi(200)
///     .output_dir("final_json_output")
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// DPI for the numbered renders sent to the identification call. Range: 72–400. Default: 200.
    pub identify_dpi: u32,

    /// DPI for the clean page images used for extraction. Range: 72–400. Default: 200.
    ///
    /// Survey tables use small print; below ~150 DPI survey codes and dates
    /// start to be misread.
    pub render_dpi: u32,

    /// Longest-edge cap in pixels applied to every render. Default: 3000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision model. Takes precedence over every provider
    /// setting; used to plug in alternative backends or test doubles.
    pub vision_model: Option<Arc<dyn VisionModel>>,

    /// Rasteriser backend. Defaults to pdfium when None.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 8192.
    ///
    /// A dense survey page can carry 40+ rows of ten columns each; the JSON
    /// for that runs to several thousand tokens.
    pub max_tokens: usize,

    /// Retries on a transport failure of a hosted-model call. Default: 3.
    ///
    /// Unparseable answers are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Section-identification instruction. If None, uses the built-in
    /// Planned Machinery Survey prompt.
    pub section_prompt: Option<String>,

    /// Target JSON shape for each extracted page.
    pub schema: Arc<ExtractionSchema>,

    /// Directory for the aggregated JSON files. Default: `final_json_output`.
    pub output_dir: PathBuf,

    /// Directory for the clean page images. Default: `images`.
    pub images_dir: PathBuf,

    /// Directory where URL sources are downloaded. Default: `downloaded_pdfs`.
    pub download_dir: PathBuf,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per hosted-model call timeout in seconds. Default: 120.
    ///
    /// The identification call carries every page of the report and is
    /// much slower than a single-page extraction.
    pub api_timeout_secs: u64,

    /// Optional per-document / per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            identify_dpi: 200,
            render_dpi: 200,
            max_rendered_pixels: 3000,
            model: None,
            provider_name: None,
            provider: None,
            vision_model: None,
            rasterizer: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            password: None,
            section_prompt: None,
            schema: Arc::new(ExtractionSchema::default()),
            output_dir: PathBuf::from("final_json_output"),
            images_dir: PathBuf::from("images"),
            download_dir: PathBuf::from("downloaded_pdfs"),
            download_timeout_secs: 120,
            api_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("identify_dpi", &self.identify_dpi)
            .field("render_dpi", &self.render_dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("vision_model", &self.vision_model.as_ref().map(|_| "<dyn VisionModel>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("schema", &self.schema.name)
            .field("output_dir", &self.output_dir)
            .field("images_dir", &self.images_dir)
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn identify_dpi(mut self, dpi: u32) -> Self {
        self.config.identify_dpi = dpi;
        self
    }

    pub fn render_dpi(mut self, dpi: u32) -> Self {
        self.config.render_dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision_model = Some(model);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn section_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.section_prompt = Some(prompt.into());
        self
    }

    pub fn schema(mut self, schema: ExtractionSchema) -> Self {
        self.config.schema = Arc::new(schema);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.images_dir = dir.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, SurveyError> {
        let c = &self.config;
        for (name, dpi) in [("identify", c.identify_dpi), ("render", c.render_dpi)] {
            if !(72..=400).contains(&dpi) {
                return Err(SurveyError::InvalidConfig(format!(
                    "{name} DPI must be 72–400, got {dpi}"
                )));
            }
        }
        if c.max_tokens == 0 {
            return Err(SurveyError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.download_timeout_secs == 0 {
            return Err(SurveyError::InvalidConfig("timeouts must be ≥ 1s".into()));
        }
        c.schema.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = ExtractionConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.identify_dpi, 200);
        assert_eq!(config.render_dpi, 200);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.output_dir, PathBuf::from("final_json_output"));
        assert_eq!(config.schema.name, "Planned_Machinery_Survey_Schema");
    }

    #[test]
    fn dpi_out_of_range_rejected() {
        let err = ExtractionConfig::builder().render_dpi(50).build().unwrap_err();
        assert!(err.to_string().contains("render DPI"), "got: {err}");
        assert!(ExtractionConfig::builder().identify_dpi(600).build().is_err());
    }

    #[test]
    fn temperature_is_clamped() {
        let config = ExtractionConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn debug_hides_provider() {
        let config = ExtractionConfig::default();
        let dbg = format!("{config:?}");
        assert!(dbg.contains("Planned_Machinery_Survey_Schema"));
        assert!(!dbg.contains("progress_callback"));
    }
}
