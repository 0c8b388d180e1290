//! OpenAPI documentation, served at `/openapi.json`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "upd",
        description = "Stores multipart file uploads in a directory on local disk."
    ),
    paths(api::handlers::upload::upload_file),
    tags(
        (name = "uploads", description = "File upload")
    )
)]
pub struct ApiDoc;
