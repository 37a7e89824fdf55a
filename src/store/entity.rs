use super::StoreError;
use crate::shared::front_matter;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Json,
    /// Markdown with a YAML front-matter block.
    Markdown,
}

impl RecordFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// A record persisted in a [`super::Vault`], keyed by its id.
pub trait Entity: Serialize + DeserializeOwned {
    const FORMAT: RecordFormat;

    fn entity_id(&self) -> &str;

    /// Markdown body rendered below the front matter.
    fn markdown_body(&self) -> String {
        String::new()
    }
}

pub(crate) fn key_for<E: Entity>(id: &str) -> String {
    format!("{id}.{}", E::FORMAT.extension())
}

pub(crate) fn id_from_key<E: Entity>(key: &str) -> Option<&str> {
    key.strip_suffix(E::FORMAT.extension())
        .and_then(|stem| stem.strip_suffix('.'))
        .filter(|stem| !stem.is_empty())
}

pub(crate) fn encode<E: Entity>(entity: &E) -> Result<Vec<u8>, StoreError> {
    let encoded = match E::FORMAT {
        RecordFormat::Json => serde_json::to_string_pretty(entity)
            .map(|mut body| {
                body.push('\n');
                body
            })
            .map_err(|err| err.to_string()),
        RecordFormat::Markdown => front_matter::render(entity, &entity.markdown_body()),
    };
    encoded
        .map(String::into_bytes)
        .map_err(|reason| StoreError::Encode {
            id: entity.entity_id().to_string(),
            reason,
        })
}

pub(crate) fn decode<E: Entity>(raw: &[u8], location: &str) -> Result<E, StoreError> {
    let text = std::str::from_utf8(raw).map_err(|err| StoreError::Decode {
        path: location.to_string(),
        reason: err.to_string(),
    })?;
    let decoded = match E::FORMAT {
        RecordFormat::Json => serde_json::from_str(text).map_err(|err| err.to_string()),
        RecordFormat::Markdown => front_matter::parse(text),
    };
    decoded.map_err(|reason| StoreError::Decode {
        path: location.to_string(),
        reason,
    })
}
