//! Supported conversion table.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::context::AppContext;

/// Map of input format to the sorted list of outputs it converts to.
#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct FormatsResponse(pub BTreeMap<String, Vec<String>>);

/// GET /formats
#[utoipa::path(
    get,
    path = "/formats",
    responses(
        (status = 200, description = "Input formats and their outputs", body = FormatsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_formats(State(ctx): State<AppContext>) -> Json<FormatsResponse> {
    let table = ctx
        .formats
        .table()
        .into_iter()
        .map(|(input, outputs)| {
            (
                input.to_string(),
                outputs.into_iter().map(String::from).collect(),
            )
        })
        .collect();
    Json(FormatsResponse(table))
}
