use super::AppState;
use crate::domain::order::OrderRecord;
use crate::error::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::put,
};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new().route("/orders/{id}", put(register).get(show))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrderBody {
    pub owner_id: String,
}

async fn register(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RegisterOrderBody>,
) -> Result<Json<OrderRecord>> {
    Ok(Json(
        state.orchestrator.register_order(&id, &body.owner_id).await?,
    ))
}

async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<OrderRecord>> {
    Ok(Json(state.orchestrator.get_order(&id).await?))
}
