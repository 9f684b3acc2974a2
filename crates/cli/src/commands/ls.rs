//! ls command - List the objects a locator covers

use clap::Args;
use futures::TryStreamExt;
use serde::Serialize;
use xfer_core::{
    CapabilityRegistry, ObjectDescriptor, ObjectLister, OperationKind, parse_locator,
};

use crate::commands::AppContext;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// List objects under a prefix, or a single object
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Locator to list (s3://bucket/prefix/, a local directory, ...)
    pub locator: String,
}

#[derive(Debug, Serialize)]
struct LsOutput {
    locator: String,
    items: Vec<ObjectDescriptor>,
    total_objects: usize,
    total_bytes: u64,
}

/// Execute the ls command
pub async fn execute(args: LsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let locator = match parse_locator(&args.locator) {
        Ok(l) => l,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    if let Err(e) =
        CapabilityRegistry::builtin().require_support(locator.scheme(), OperationKind::ListObjects)
    {
        formatter.error(&e.to_string());
        return ExitCode::from(&e);
    }

    let ctx = match AppContext::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::UsageError;
        }
    };

    let endpoint = match ctx.connect(locator).await {
        Ok(ep) => ep,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    let lister = ObjectLister::new(endpoint.client.clone(), endpoint.locator.clone());
    let items: Vec<ObjectDescriptor> = match lister.into_stream().try_collect().await {
        Ok(items) => items,
        Err(e) => {
            formatter.error(&format!("Failed to list {}: {e}", endpoint.locator));
            return ExitCode::from(&e);
        }
    };

    let total_bytes = items.iter().map(|o| o.size).sum();

    if formatter.is_json() {
        formatter.json(&LsOutput {
            locator: endpoint.locator.to_string(),
            total_objects: items.len(),
            total_bytes,
            items,
        });
        return ExitCode::Success;
    }

    for item in &items {
        let date = item
            .last_modified
            .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".repeat(19));
        formatter.println(&format!(
            "{} {:>10} {}",
            formatter.style_date(&date),
            formatter.style_size(item.size),
            item.key
        ));
    }
    formatter.println(&format!(
        "{} {} object(s), {}",
        formatter.style_label("Total:"),
        items.len(),
        formatter.style_size(total_bytes)
    ));

    ExitCode::Success
}
