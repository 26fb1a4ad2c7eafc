use serde::Deserialize;

use super::{ApiError, PortalApi};
use crate::model::ScheduleEntry;

const SCHEDULE_PATH: &str = "me/schedule/";

#[derive(Deserialize)]
struct SlotWire {
    subject_code: String,
    weekday: u8,
    start_time: String,
    #[serde(default)]
    group: String,
    duration: u32,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    rooms: String,
    #[serde(default)]
    language: String,
}

impl From<SlotWire> for ScheduleEntry {
    fn from(wire: SlotWire) -> Self {
        ScheduleEntry {
            subject_code: wire.subject_code,
            weekday: wire.weekday,
            start_time: wire.start_time,
            group: wire.group,
            duration_hours: wire.duration,
            kind: wire.kind,
            rooms: wire.rooms,
            language: wire.language,
        }
    }
}

impl PortalApi {
    /// Weekly class timetable.
    pub async fn schedule(&self, token: &str) -> Result<Vec<ScheduleEntry>, ApiError> {
        let wire: Vec<SlotWire> = self.get_list(&self.url(SCHEDULE_PATH), token).await?;
        Ok(wire.into_iter().map(ScheduleEntry::from).collect())
    }
}
