use chrono::NaiveDateTime;
use serde::Deserialize;

use super::{ApiError, PortalApi};
use crate::model::Event;

const EVENTS_PATH: &str = "events/";

#[derive(Deserialize)]
struct EventWire {
    name: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
    category: String,
}

impl PortalApi {
    /// Public calendar events of every category.
    pub async fn events(&self, token: &str) -> Result<Vec<Event>, ApiError> {
        let wire: Vec<EventWire> = self.get_list(&self.url(EVENTS_PATH), token).await?;
        Ok(wire
            .into_iter()
            .map(|e| Event {
                name: e.name,
                start: e.start,
                end: e.end,
                category: e.category,
            })
            .collect())
    }
}
