use std::fmt::Write as _;
use std::sync::Arc;

use crate::cli::UpdateListArgs;
use preload_registry::config::AppConfig;
use preload_registry::error::AppError;
use preload_registry::telemetry;
use preload_registry::workflows::pending_changes::{rewrite_list_file, PendingChangesClient};
use preload_registry::workflows::preload::HeaderScanner;
use tracing::info;

pub(crate) async fn run(args: UpdateListArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let service_url = args.service_url.unwrap_or(config.tool.service_url);
    info!(%service_url, list_path = %args.list_path.display(), "rolling pending changes into the list");

    let client = PendingChangesClient::new(service_url)?;
    let mut changes = client.fetch().await?;
    changes.filter(Arc::new(HeaderScanner::new()?)).await;

    let updated = rewrite_list_file(&args.list_path, &changes).await?;
    print!("{}", report(&updated.duplicates));
    Ok(())
}

/// Operator-facing summary printed once the file has been rewritten.
pub(crate) fn report(duplicates: &[String]) -> String {
    if duplicates.is_empty() {
        return "SUCCESS\n".to_string();
    }

    let mut out = String::from("WARNING\nDuplicate entries:\n");
    for domain in duplicates {
        let _ = writeln!(out, "- {domain}");
    }
    out.push_str("You'll need to manually deduplicate entries before committing them upstream.\n");
    out.push_str(
        "Note: if there are a lot of duplicate entries, the tool may have run twice on the same checkout. Reset it and try again.\n",
    );
    out
}
