use chrono::NaiveDateTime;
use serde::Deserialize;

use super::{ApiError, PortalApi};
use crate::model::{Notice, NoticeFile};

const NOTICES_PATH: &str = "me/notices/";

#[derive(Deserialize)]
struct NoticeWire {
    id: u64,
    title: String,
    subject_code: String,
    #[serde(default)]
    text: String,
    inserted_at: NaiveDateTime,
    modified_at: NaiveDateTime,
    #[serde(default)]
    expires_at: Option<NaiveDateTime>,
    #[serde(default)]
    attachments: Vec<AttachmentWire>,
}

#[derive(Deserialize)]
struct AttachmentWire {
    #[serde(default)]
    mime_type: String,
    name: String,
    url: String,
    modified_at: NaiveDateTime,
    #[serde(default)]
    size: u64,
}

impl From<NoticeWire> for Notice {
    fn from(wire: NoticeWire) -> Self {
        let id = wire.id;
        Notice {
            id,
            title: wire.title,
            subject_code: wire.subject_code,
            text: wire.text,
            inserted_at: wire.inserted_at,
            modified_at: wire.modified_at,
            expires_at: wire.expires_at,
            attachments: wire
                .attachments
                .into_iter()
                .map(|a| NoticeFile {
                    mime_type: a.mime_type,
                    name: a.name,
                    url: a.url,
                    modified_at: a.modified_at,
                    size_bytes: a.size,
                    notice_id: id,
                })
                .collect(),
        }
    }
}

impl PortalApi {
    /// Notices for every subject the user is enrolled in.
    pub async fn notices(&self, token: &str) -> Result<Vec<Notice>, ApiError> {
        let wire: Vec<NoticeWire> = self.get_list(&self.url(NOTICES_PATH), token).await?;
        Ok(wire.into_iter().map(Notice::from).collect())
    }
}
