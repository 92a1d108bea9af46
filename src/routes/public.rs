use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use crate::error::{GavelError, GavelResult};
use crate::models::event::{Event, EventFilter};
use crate::models::resource::{Resource, ResourceFilter};
use crate::models::DATE_FORMAT;
use crate::state::AppState;
use crate::util::current_time;

const UPCOMING_EVENT_COUNT: usize = 3;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub upcoming_events: Vec<Event>,
    pub resource_count: usize,
}

pub async fn home(State(state): State<AppState>) -> GavelResult<Json<Overview>> {
    let today = current_time()
        .date()
        .format(DATE_FORMAT)
        .map_err(|err| GavelError::Server(format!("failed to format date: {}", err)))?;

    let mut upcoming_events = Event::all(&state.store)
        .await
        .into_iter()
        .filter(|event| event.date >= today)
        .collect::<Vec<_>>();
    upcoming_events.sort_by(|a, b| (&a.date, &a.time).cmp(&(&b.date, &b.time)));
    upcoming_events.truncate(UPCOMING_EVENT_COUNT);

    let resource_count = Resource::list_public(&ResourceFilter::default(), &state.store)
        .await
        .len();

    Ok(Json(Overview {
        upcoming_events,
        resource_count,
    }))
}

pub async fn events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Json<Vec<Event>> {
    Json(Event::list(&filter, &state.store).await)
}

/// Public resources, with links resolved through the CDN.
pub async fn resources(
    State(state): State<AppState>,
    Query(filter): Query<ResourceFilter>,
) -> Json<Vec<Resource>> {
    let resources = Resource::list_public(&filter, &state.store)
        .await
        .into_iter()
        .map(|mut resource| {
            resource.url = state.cdn.public_url(&resource);
            resource
        })
        .collect();

    Json(resources)
}
