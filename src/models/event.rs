use async_graphql::{Enum, InputObject, SimpleObject};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time};

use super::{unknown_time, DATE_FORMAT, TIME_FORMAT};
use crate::error::{GavelError, GavelResult};
use crate::store::collection::Record;
use crate::store::Store;
use crate::util::{contains_ignore_case, current_time, current_time_after, new_id};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Enum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Competition,
    Meeting,
    Social,
    #[default]
    Other,
}

impl EventType {
    pub fn display_name(self) -> &'static str {
        match self {
            EventType::Competition => "Competition",
            EventType::Meeting => "Meeting",
            EventType::Social => "Social Event",
            EventType::Other => "Other",
        }
    }
}

/// A chapter event, shown on the public events page.
#[derive(SimpleObject, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// The ID of the event
    pub id: String,
    /// The name of the event
    pub title: String,
    /// What the event is about
    #[serde(default)]
    pub description: String,
    /// The day of the event, as `YYYY-MM-DD`
    #[serde(default)]
    pub date: String,
    /// When the event starts, as `HH:MM`
    #[serde(default)]
    pub time: String,
    /// Where the event will be held
    #[serde(default)]
    pub location: String,
    /// What kind of event this is
    #[serde(default)]
    pub r#type: EventType,
    #[serde(with = "time::serde::rfc3339", default = "unknown_time")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "unknown_time")]
    pub updated_at: OffsetDateTime,
}

impl Record for Event {
    const KIND: &'static str = "event";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct NewEvent {
    pub title: String,
    #[graphql(default)]
    pub description: String,
    #[graphql(default)]
    pub date: String,
    #[graphql(default)]
    pub time: String,
    #[graphql(default)]
    pub location: String,
    pub r#type: Option<EventType>,
}

/// Fields to change on an event; omitted fields are left as they are.
#[derive(InputObject, Clone, Debug, Default)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub r#type: Option<EventType>,
}

#[derive(InputObject, Clone, Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Matched case-insensitively against the title and description
    pub search: Option<String>,
    pub r#type: Option<EventType>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        let matches_search = self.search.as_deref().map_or(true, |search| {
            contains_ignore_case(&event.title, search)
                || contains_ignore_case(&event.description, search)
        });
        let matches_type = self.r#type.map_or(true, |r#type| event.r#type == r#type);

        matches_search && matches_type
    }
}

fn validate_schedule(title: &str, date: &str, time: &str) -> GavelResult<()> {
    if title.trim().is_empty() {
        return Err(GavelError::BadRequest("an event needs a title".to_owned()));
    }
    if !date.is_empty() && Date::parse(date, DATE_FORMAT).is_err() {
        return Err(GavelError::BadRequest(format!(
            "invalid event date {:?}, expected YYYY-MM-DD",
            date
        )));
    }
    if !time.is_empty() && Time::parse(time, TIME_FORMAT).is_err() {
        return Err(GavelError::BadRequest(format!(
            "invalid event time {:?}, expected HH:MM",
            time
        )));
    }

    Ok(())
}

impl Event {
    pub async fn with_id(id: &str, store: &Store) -> GavelResult<Self> {
        Self::with_id_opt(id, store)
            .await
            .ok_or_else(|| GavelError::not_found(Self::KIND, id))
    }

    pub async fn with_id_opt(id: &str, store: &Store) -> Option<Self> {
        store.events().find(id).await
    }

    pub async fn all(store: &Store) -> Vec<Self> {
        store.events().all().await
    }

    pub async fn list(filter: &EventFilter, store: &Store) -> Vec<Self> {
        Self::all(store)
            .await
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect()
    }

    pub async fn create(
        new_event: NewEvent,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        validate_schedule(&new_event.title, &new_event.date, &new_event.time)?;

        let now = current_time();
        let event = Event {
            id: new_id(),
            title: new_event.title,
            description: new_event.description,
            date: new_event.date,
            time: new_event.time,
            location: new_event.location,
            r#type: new_event.r#type.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        store.events().insert(event, expected_revision).await
    }

    pub async fn update(
        id: &str,
        update: EventUpdate,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        store
            .events()
            .update(id, expected_revision, |event, _| {
                if let Some(title) = update.title {
                    event.title = title;
                }
                if let Some(description) = update.description {
                    event.description = description;
                }
                if let Some(date) = update.date {
                    event.date = date;
                }
                if let Some(time) = update.time {
                    event.time = time;
                }
                if let Some(location) = update.location {
                    event.location = location;
                }
                if let Some(r#type) = update.r#type {
                    event.r#type = r#type;
                }

                validate_schedule(&event.title, &event.date, &event.time)?;
                event.updated_at = current_time_after(event.updated_at);

                Ok(())
            })
            .await
    }

    pub async fn delete(
        id: &str,
        confirmed: bool,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        if !confirmed {
            return Err(GavelError::ConfirmationRequired);
        }

        store.events().remove(id, expected_revision).await
    }
}
