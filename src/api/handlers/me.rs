use axum::{extract::State, response::Json, Extension};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    api::{session::SessionHandle, CasState},
    cas::{Attributes, SessionProjector},
};

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq)]
pub struct Me {
    username: Option<String>,
    #[schema(value_type = Object)]
    attributes: Attributes,
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Identity and attributes of the logged-in user", body = Me),
        (status = 302, description = "Not logged in, redirect to CAS")
    ),
    tag = "cas"
)]
pub async fn me(
    State(state): State<CasState>,
    Extension(session): Extension<SessionHandle>,
) -> Json<Me> {
    let projector = SessionProjector::new(&session, state.config());
    Json(Me {
        username: projector.current_user(),
        attributes: projector.current_attrs(),
    })
}
