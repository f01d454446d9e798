use serde::{Deserialize, Deserializer, Serialize};

use super::repo_types::{Photo, PhotoStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PictureItem {
    pub file_name: String,
    pub status: PhotoStatus,
}

impl From<Photo> for PictureItem {
    fn from(p: Photo) -> Self {
        Self {
            file_name: p.file_name,
            status: p.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PicturesResponse {
    pub pictures: Vec<PictureItem>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub partyname: Option<String>,
}

/// `?acceptedonly=true` on the listing and the archive download.
#[derive(Debug, Default, Deserialize)]
pub struct AcceptedOnlyQuery {
    #[serde(default, deserialize_with = "lenient_flag")]
    pub acceptedonly: Option<bool>,
}

/// Empty, `false`, `0`, `no` and `off` mean false; any other value is true,
/// which is how older clients used the flag.
fn lenient_flag<'de, D>(de: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(de)?;
    Ok(raw.map(|v| {
        !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        )
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusQuery {
    pub filename: Option<String>,
    pub status: Option<String>,
}
