//! Fixed vocabulary of artifact categories and logical names.
use crate::error::StoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[serde(alias = "staging")]
    Processing,
    Images,
    Prompts,
    Responses,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Processing,
        Category::Images,
        Category::Prompts,
        Category::Responses,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Images => "images",
            Self::Prompts => "prompts",
            Self::Responses => "responses",
        }
    }

    pub fn logical_names(self) -> impl Iterator<Item = LogicalName> {
        LogicalName::ALL
            .into_iter()
            .filter(move |name| name.category() == self)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" | "staging" => Ok(Self::Processing),
            "images" => Ok(Self::Images),
            "prompts" => Ok(Self::Prompts),
            "responses" => Ok(Self::Responses),
            other => Err(StoreError::UnknownArtifact {
                category: other.to_string(),
                name: String::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogicalName {
    Initialization,
    LayoutMetadata,
    HistoricalContext,
    ProcessingMetrics,
    FinalResults,
    ErrorInfo,
    Metadata,
    ReferenceImageBase64,
    CheckingImageBase64,
    SystemPrompt,
    Turn1Prompt,
    Turn2Prompt,
    Turn1RawResponse,
    Turn1ProcessedResponse,
    Turn1Conversation,
    Turn2RawResponse,
    Turn2ProcessedResponse,
    Turn2Conversation,
}

impl LogicalName {
    pub const ALL: [LogicalName; 18] = [
        LogicalName::Initialization,
        LogicalName::LayoutMetadata,
        LogicalName::HistoricalContext,
        LogicalName::ProcessingMetrics,
        LogicalName::FinalResults,
        LogicalName::ErrorInfo,
        LogicalName::Metadata,
        LogicalName::ReferenceImageBase64,
        LogicalName::CheckingImageBase64,
        LogicalName::SystemPrompt,
        LogicalName::Turn1Prompt,
        LogicalName::Turn2Prompt,
        LogicalName::Turn1RawResponse,
        LogicalName::Turn1ProcessedResponse,
        LogicalName::Turn1Conversation,
        LogicalName::Turn2RawResponse,
        LogicalName::Turn2ProcessedResponse,
        LogicalName::Turn2Conversation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::LayoutMetadata => "layout-metadata",
            Self::HistoricalContext => "historical-context",
            Self::ProcessingMetrics => "processing-metrics",
            Self::FinalResults => "final-results",
            Self::ErrorInfo => "error-info",
            Self::Metadata => "metadata",
            Self::ReferenceImageBase64 => "reference-image-base64",
            Self::CheckingImageBase64 => "checking-image-base64",
            Self::SystemPrompt => "system-prompt",
            Self::Turn1Prompt => "turn1-prompt",
            Self::Turn2Prompt => "turn2-prompt",
            Self::Turn1RawResponse => "turn1-raw-response",
            Self::Turn1ProcessedResponse => "turn1-processed-response",
            Self::Turn1Conversation => "turn1-conversation",
            Self::Turn2RawResponse => "turn2-raw-response",
            Self::Turn2ProcessedResponse => "turn2-processed-response",
            Self::Turn2Conversation => "turn2-conversation",
        }
    }

    pub fn category(self) -> Category {
        match self {
            Self::Initialization
            | Self::LayoutMetadata
            | Self::HistoricalContext
            | Self::ProcessingMetrics
            | Self::FinalResults
            | Self::ErrorInfo => Category::Processing,
            Self::Metadata | Self::ReferenceImageBase64 | Self::CheckingImageBase64 => {
                Category::Images
            }
            Self::SystemPrompt | Self::Turn1Prompt | Self::Turn2Prompt => Category::Prompts,
            Self::Turn1RawResponse
            | Self::Turn1ProcessedResponse
            | Self::Turn1Conversation
            | Self::Turn2RawResponse
            | Self::Turn2ProcessedResponse
            | Self::Turn2Conversation => Category::Responses,
        }
    }

    /// Create-once artifacts refuse a second write for the same run.
    pub fn is_create_once(self) -> bool {
        matches!(self, Self::Initialization | Self::LayoutMetadata)
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == value)
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized (category, logical name) pair.
///
/// Serialized as `<category>_<logical-name>`, which is the envelope's
/// reference map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    category: Category,
    name: LogicalName,
}

impl ArtifactKey {
    pub fn new(category: Category, name: LogicalName) -> Result<Self, StoreError> {
        if name.category() != category {
            return Err(StoreError::UnknownArtifact {
                category: category.as_str().to_string(),
                name: name.as_str().to_string(),
            });
        }
        Ok(Self { category, name })
    }

    /// Resolve a pair of raw strings, rejecting anything outside the registry.
    pub fn parse(category: &str, name: &str) -> Result<Self, StoreError> {
        let unknown = || StoreError::UnknownArtifact {
            category: category.to_string(),
            name: name.to_string(),
        };
        let category = Category::from_str(category).map_err(|_| unknown())?;
        let name = LogicalName::parse(name).ok_or_else(unknown)?;
        Self::new(category, name).map_err(|_| unknown())
    }

    pub fn category(self) -> Category {
        self.category
    }

    pub fn name(self) -> LogicalName {
        self.name
    }
}

impl From<LogicalName> for ArtifactKey {
    fn from(name: LogicalName) -> Self {
        Self {
            category: name.category(),
            name,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.category, self.name)
    }
}

impl FromStr for ArtifactKey {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('_') {
            Some((category, name)) => Self::parse(category, name),
            None => Err(StoreError::UnknownArtifact {
                category: value.to_string(),
                name: String::new(),
            }),
        }
    }
}

impl Serialize for ArtifactKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
