use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::{Html, Redirect};
use axum::Json;

use crate::auth::CurrentUser;
use crate::error::{GavelError, GavelResult};
use crate::guard::DASHBOARD_PATH;
use crate::models::dashboard::Dashboard;
use crate::models::user::User;
use crate::state::AppState;

pub async fn root() -> Redirect {
    Redirect::to(DASHBOARD_PATH)
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> GavelResult<Json<Dashboard>> {
    let user = User::with_id_opt(&session.user.id, &state.store)
        .await
        .filter(User::is_active)
        .ok_or(GavelError::Unauthorized)?;

    Ok(Json(Dashboard::for_viewer(&user, &state.store).await))
}

pub async fn graphiql() -> Html<String> {
    Html(GraphiQLSource::build().endpoint("/admin/api").finish())
}

pub async fn graphql(
    State(state): State<AppState>,
    current_user: Option<CurrentUser>,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let mut request = request.into_inner();
    if let Some(CurrentUser(session)) = current_user {
        request = request.data(session);
    }

    state.schema.execute(request).await.into()
}
