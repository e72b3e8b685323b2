use serde::{Deserialize, Serialize};

/// A generated or edited image. Never mutated once created; an edit yields a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "b64_json", default, skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_prompt: Option<String>,
}

impl GeneratedImage {
    pub fn with_original_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.original_prompt = Some(prompt.into());
        self
    }

    /// Derive the record for an edit of `self`: the prompt chain grows by one arrow.
    pub fn edited(&self, result: GeneratedImage, instruction: &str) -> GeneratedImage {
        let chain = match self.original_prompt.as_deref() {
            Some(base) if !base.is_empty() => format!("{base} → {instruction}"),
            _ => instruction.to_string(),
        };
        GeneratedImage {
            original_prompt: Some(chain),
            edit_prompt: Some(instruction.to_string()),
            ..result
        }
    }
}

/// Persisted form of an image: synthetic id plus creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub created_at: i64,
    pub image: GeneratedImage,
}

impl ImageRecord {
    pub fn into_image(self) -> GeneratedImage {
        self.image
    }
}

/// Linear edit history of one editing session. Lives in memory only.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    versions: Vec<GeneratedImage>,
    cursor: usize,
}

impl EditSession {
    pub fn new(source: GeneratedImage) -> Self {
        Self {
            versions: vec![source],
            cursor: 0,
        }
    }

    pub fn current(&self) -> Option<&GeneratedImage> {
        self.versions.get(self.cursor)
    }

    pub fn versions(&self) -> &[GeneratedImage] {
        &self.versions
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Append an edit of the current version. Anything after the cursor is discarded.
    pub fn push(&mut self, image: GeneratedImage) {
        if !self.versions.is_empty() {
            self.versions.truncate(self.cursor + 1);
        }
        self.versions.push(image);
        self.cursor = self.versions.len() - 1;
    }

    pub fn can_go_back(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.cursor + 1 < self.versions.len()
    }

    pub fn back(&mut self) -> Option<&GeneratedImage> {
        if self.can_go_back() {
            self.cursor -= 1;
        }
        self.current()
    }

    pub fn forward(&mut self) -> Option<&GeneratedImage> {
        if self.can_go_forward() {
            self.cursor += 1;
        }
        self.current()
    }
}
