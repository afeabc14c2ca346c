//! Content data model: the normalized bundle handed back to callers.

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// One post idea.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostIdea {
    pub title: String,
    pub description: String,
    pub image_idea: String,
}

impl PostIdea {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        image_idea: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            image_idea: image_idea.into(),
        }
    }
}

/// Normalized content produced from a model response.
///
/// Every sequence is always present; an absent field is an empty `Vec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBundle {
    pub captions: Vec<String>,
    pub hashtags: Vec<String>,
    pub ideas: Vec<PostIdea>,
}

impl ContentBundle {
    /// Bundle with every sequence empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty() && self.hashtags.is_empty() && self.ideas.is_empty()
    }
}

/// A request to generate social content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub platform: String,
    pub industry: String,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
}

impl GenerateRequest {
    pub const DEFAULT_TONE: &'static str = "friendly";

    /// Reject requests missing the fields the prompt cannot do without.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.platform.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("platform must not be blank".into()));
        }
        if self.industry.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("industry must not be blank".into()));
        }
        Ok(())
    }

    /// Tone to use, falling back to the default when unset or blank.
    pub fn tone(&self) -> &str {
        match self.tone.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => Self::DEFAULT_TONE,
        }
    }

    /// Keywords, if any non-blank ones were given.
    pub fn keywords(&self) -> Option<&str> {
        self.keywords
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(platform: &str, industry: &str) -> GenerateRequest {
        GenerateRequest {
            platform: platform.into(),
            industry: industry.into(),
            tone: None,
            keywords: None,
        }
    }

    #[test]
    fn idea_serializes_camel_case() {
        let idea = PostIdea::new("T", "D", "I");
        let json = serde_json::to_value(&idea).unwrap();
        assert_eq!(json["imageIdea"], "I");
        assert!(json.get("image_idea").is_none());
    }

    #[test]
    fn empty_bundle_serializes_all_sequences() {
        let json = serde_json::to_value(ContentBundle::empty()).unwrap();
        assert!(json["captions"].as_array().unwrap().is_empty());
        assert!(json["hashtags"].as_array().unwrap().is_empty());
        assert!(json["ideas"].as_array().unwrap().is_empty());
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(request("instagram", "coffee").validate().is_ok());
        assert!(request("  ", "coffee").validate().is_err());
        assert!(request("instagram", "").validate().is_err());
    }

    #[test]
    fn tone_defaults_when_blank() {
        let mut req = request("x", "y");
        assert_eq!(req.tone(), "friendly");
        req.tone = Some("   ".into());
        assert_eq!(req.tone(), "friendly");
        req.tone = Some("witty".into());
        assert_eq!(req.tone(), "witty");
    }
}
