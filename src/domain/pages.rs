use serde::{Deserialize, Serialize};

use crate::cache::{EntityTag, Taggable};

use super::error::DomainError;

/// Dependency tag prefix shared by every CMS page.
pub const PAGE_TAG_PREFIX: &str = "cms_p";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: u64,
    pub identifier: String,
    pub title: String,
    pub content: String,
    pub url_key: String,
    /// Responses that read this page must not be stored.
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

fn default_cacheable() -> bool {
    true
}

impl PageRecord {
    pub fn new(
        id: u64,
        identifier: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            id,
            url_key: identifier.clone(),
            identifier,
            title: title.into(),
            content: content.into(),
            cacheable: true,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.identifier.trim().is_empty() {
            return Err(DomainError::validation("page identifier must not be empty"));
        }
        if self.url_key.trim().is_empty() {
            return Err(DomainError::validation("page url_key must not be empty"));
        }
        if self.url_key.contains(' ') {
            return Err(DomainError::validation("page url_key must not contain spaces"));
        }
        Ok(())
    }
}

impl Taggable for PageRecord {
    fn entity_tag(&self) -> EntityTag {
        EntityTag::new(PAGE_TAG_PREFIX, self.id)
    }
}
