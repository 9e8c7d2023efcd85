mod cli;
mod infra;
mod routes;
mod server;
mod updatelist;

use preload_registry::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
