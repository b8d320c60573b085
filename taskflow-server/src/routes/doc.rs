use utoipa::OpenApi;

use crate::routes::{batch, greeter, health, metrics, tasks, watch};

#[derive(OpenApi)]
#[openapi(info(
    title = "taskflow-server",
    description = "TaskFlow task-tracking API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(tasks::TasksApi::openapi());
    root.merge(watch::WatchApi::openapi());
    root.merge(batch::BatchApi::openapi());
    root.merge(greeter::GreeterApi::openapi());
    root.merge(health::HealthApi::openapi());
    root.merge(metrics::MetricsApi::openapi());
    root
}
