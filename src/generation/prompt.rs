use std::str::FromStr;

const STYLE_PREFIX: &str = "Black & white refined lineart 用户输入的提示词：";
const STYLE_SUFFIX: &str = ", elegant mood, 6–8 detailed elements, crisp high-contrast outlines, coloring-book style. --stylize 750 --no watermarks --no signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    Square,
    #[default]
    Portrait,
    Landscape,
}

impl AspectRatio {
    /// Ratio token accepted by the upstream API.
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "2:3",
            Self::Landscape => "3:2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "square" | "1:1" => Ok(Self::Square),
            "portrait" | "default" | "2:3" => Ok(Self::Portrait),
            "landscape" | "3:2" => Ok(Self::Landscape),
            _ => Err(String::from(
                "Field 'aspectRatio' must be one of: square, portrait, landscape",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityHint {
    #[default]
    Medium,
    High,
}

impl QualityHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for QualityHint {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(String::from("Field 'qualityHint' must be medium|high")),
        }
    }
}

/// A validated generation request. `scene_text` is trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub scene_text: String,
    pub aspect_ratio: AspectRatio,
    pub quality: QualityHint,
}

pub fn build_prompt(scene: &str) -> String {
    format!("{STYLE_PREFIX}{}{STYLE_SUFFIX}", scene.trim())
}
